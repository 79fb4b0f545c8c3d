//! `#[derive(Tool)]` for narrator tool argument structs.
//!
//! The derive implements `claude::ToolInput`, producing the tool name, the
//! description (from the struct's doc comment) and a JSON schema whose
//! properties come from the named fields. The schema is strict: unknown
//! properties are disallowed, and range and enumeration constraints declared
//! on fields are emitted so they can be enforced before a handler runs.
//!
//! # Example
//!
//! ```ignore
//! /// Move the player to a neighboring location
//! #[derive(Tool, Deserialize)]
//! #[tool(name = "move")]
//! struct Move {
//!     /// Name of a location adjacent to the current one
//!     destination: String,
//! }
//!
//! /// Grant items to the player
//! #[derive(Tool, Deserialize)]
//! struct GrantItem {
//!     item: String,
//!     #[tool(min = 1, max = 99)]
//!     quantity: i64,
//!     #[tool(one_of = "misc|weapon|armor|consumable")]
//!     kind: Option<String>,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, DeriveInput, Expr, Field, Lit, LitStr, Meta, Type};

/// Derive macro for generating `claude::ToolInput` implementations.
///
/// # Attributes
///
/// - `#[tool(name = "...")]` on the struct overrides the tool name (defaults to snake_case)
/// - `#[tool(optional)]` marks a non-`Option` field as not required
/// - `#[tool(rename = "...")]` overrides the property name
/// - `#[tool(min = N, max = N)]` adds `minimum`/`maximum` to numeric properties
/// - `#[tool(one_of = "a|b|c")]` restricts a string property to the listed values
#[proc_macro_derive(Tool, attributes(tool))]
pub fn derive_tool(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_tool(input)
        .unwrap_or_else(|err| err.to_compile_error())
        .into()
}

/// Per-field options collected from `#[tool(...)]`.
#[derive(Default)]
struct FieldOptions {
    rename: Option<String>,
    optional: bool,
    min: Option<Expr>,
    max: Option<Expr>,
    one_of: Vec<String>,
}

fn expand_tool(input: DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let tool_name = get_tool_name(&input)?;
    let description = get_doc_comment(&input.attrs);

    let fields = match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            syn::Fields::Named(named) => named.named.iter().collect::<Vec<_>>(),
            syn::Fields::Unit => Vec::new(),
            _ => {
                return Err(syn::Error::new_spanned(
                    &input,
                    "Tool derive only supports structs with named fields",
                ))
            }
        },
        _ => return Err(syn::Error::new_spanned(&input, "Tool derive only supports structs")),
    };

    let mut property_tokens = Vec::new();
    let mut required_fields = Vec::new();

    for field in fields {
        let options = field_options(field)?;
        let field_name = match &options.rename {
            Some(name) => name.clone(),
            None => field
                .ident
                .as_ref()
                .map(ToString::to_string)
                .ok_or_else(|| syn::Error::new_spanned(field, "expected a named field"))?,
        };
        let field_desc = get_doc_comment(&field.attrs);
        let type_schema = type_to_schema(&field.ty);

        let desc_token = if field_desc.is_empty() {
            quote! {}
        } else {
            quote! { property["description"] = serde_json::json!(#field_desc); }
        };
        let min_token = options
            .min
            .as_ref()
            .map(|min| quote! { property["minimum"] = serde_json::json!(#min); });
        let max_token = options
            .max
            .as_ref()
            .map(|max| quote! { property["maximum"] = serde_json::json!(#max); });
        let enum_token = if options.one_of.is_empty() {
            None
        } else {
            let values = &options.one_of;
            Some(quote! { property["enum"] = serde_json::json!([#(#values),*]); })
        };

        property_tokens.push(quote! {
            {
                let mut property = #type_schema;
                #desc_token
                #min_token
                #max_token
                #enum_token
                properties.insert(#field_name.to_string(), property);
            }
        });

        if !options.optional && !is_option_type(&field.ty) {
            required_fields.push(field_name);
        }
    }

    Ok(quote! {
        impl claude::ToolInput for #struct_name {
            fn tool_name() -> &'static str {
                #tool_name
            }

            fn tool_description() -> &'static str {
                #description
            }

            fn input_schema() -> serde_json::Value {
                #[allow(unused_mut)]
                let mut properties = serde_json::Map::new();
                #(#property_tokens)*

                let required: Vec<&str> = vec![#(#required_fields),*];

                serde_json::json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                    "additionalProperties": false
                })
            }
        }
    })
}

fn get_tool_name(input: &DeriveInput) -> syn::Result<String> {
    let mut name = None;
    for attr in &input.attrs {
        if attr.path().is_ident("tool") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("name") {
                    let value: LitStr = meta.value()?.parse()?;
                    name = Some(value.value());
                    Ok(())
                } else {
                    Err(meta.error("unsupported struct-level tool attribute"))
                }
            })?;
        }
    }

    Ok(name.unwrap_or_else(|| to_snake_case(&input.ident.to_string())))
}

fn field_options(field: &Field) -> syn::Result<FieldOptions> {
    let mut options = FieldOptions::default();
    for attr in &field.attrs {
        if !attr.path().is_ident("tool") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("optional") {
                options.optional = true;
            } else if meta.path.is_ident("rename") {
                let value: LitStr = meta.value()?.parse()?;
                options.rename = Some(value.value());
            } else if meta.path.is_ident("min") {
                options.min = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("max") {
                options.max = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("one_of") {
                let value: LitStr = meta.value()?.parse()?;
                options.one_of = value
                    .value()
                    .split('|')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect();
            } else {
                return Err(meta.error("unsupported field-level tool attribute"));
            }
            Ok(())
        })?;
    }
    Ok(options)
}

fn get_doc_comment(attrs: &[syn::Attribute]) -> String {
    let mut docs = Vec::new();
    for attr in attrs {
        if attr.path().is_ident("doc") {
            if let Meta::NameValue(nv) = &attr.meta {
                if let Expr::Lit(expr_lit) = &nv.value {
                    if let Lit::Str(s) = &expr_lit.lit {
                        docs.push(s.value().trim().to_string());
                    }
                }
            }
        }
    }
    docs.join(" ")
}

fn is_option_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        if let Some(segment) = type_path.path.segments.last() {
            return segment.ident == "Option";
        }
    }
    false
}

fn first_generic(segment: &syn::PathSegment) -> Option<&Type> {
    if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
        if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
            return Some(inner);
        }
    }
    None
}

fn type_to_schema(ty: &Type) -> TokenStream2 {
    let Type::Path(type_path) = ty else {
        return quote! { serde_json::json!({}) };
    };
    let Some(segment) = type_path.path.segments.last() else {
        return quote! { serde_json::json!({}) };
    };

    match segment.ident.to_string().as_str() {
        "String" | "str" => quote! { serde_json::json!({"type": "string"}) },
        "i8" | "i16" | "i32" | "i64" | "isize" | "u8" | "u16" | "u32" | "u64" | "usize" => {
            quote! { serde_json::json!({"type": "integer"}) }
        }
        "f32" | "f64" => quote! { serde_json::json!({"type": "number"}) },
        "bool" => quote! { serde_json::json!({"type": "boolean"}) },
        "Option" => match first_generic(segment) {
            Some(inner) => type_to_schema(inner),
            None => quote! { serde_json::json!({}) },
        },
        "Vec" => match first_generic(segment) {
            Some(inner) => {
                let inner_schema = type_to_schema(inner);
                quote! {
                    serde_json::json!({
                        "type": "array",
                        "items": #inner_schema
                    })
                }
            }
            None => quote! { serde_json::json!({"type": "array"}) },
        },
        _ => quote! { serde_json::json!({"type": "object"}) },
    }
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.push(c.to_ascii_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}
