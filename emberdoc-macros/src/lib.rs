//! Procedural macros for the emberdoc project.
//!
//! `#[derive(Model)]` registers a struct as a storable model:
//!
//! ```ignore
//! #[derive(Debug, Clone, Serialize, Deserialize, Model)]
//! #[model(name = "people", id = "email")]
//! pub struct Person {
//!     pub email: String,
//!     pub name: String,
//! }
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Model)]
//! pub struct User {
//!     #[model(id)]
//!     pub id: Option<String>,
//!     pub name: String,
//! }
//! ```
//!
//! Container attributes: `name` (collection name, defaults to the type name), `id` (declared
//! identity field) and `crate` (path to the emberdoc crate, defaults to `::emberdoc`).
//! Field attribute: `id`, marking the field as the identity.

#[allow(unused_extern_crates)]
extern crate self as emberdoc_macros;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Error, Fields, LitStr, Path, parse_macro_input, parse_quote};

#[proc_macro_derive(Model, attributes(model))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    expand_model(input)
        .unwrap_or_else(Error::into_compile_error)
        .into()
}

struct ContainerAttrs {
    name: String,
    declared_id: Option<LitStr>,
    krate: Path,
}

fn container_attrs(input: &DeriveInput) -> syn::Result<ContainerAttrs> {
    let mut attrs = ContainerAttrs {
        name: input.ident.to_string(),
        declared_id: None,
        krate: parse_quote!(::emberdoc),
    };

    for attr in input.attrs.iter().filter(|a| a.path().is_ident("model")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                let value: LitStr = meta.value()?.parse()?;
                if value.value().is_empty() {
                    return Err(meta.error("collection name must not be empty"));
                }
                attrs.name = value.value();
                Ok(())
            } else if meta.path.is_ident("id") {
                attrs.declared_id = Some(meta.value()?.parse()?);
                Ok(())
            } else if meta.path.is_ident("crate") {
                let value: LitStr = meta.value()?.parse()?;
                attrs.krate = value.parse()?;
                Ok(())
            } else {
                Err(meta.error("unsupported model attribute, expected `name`, `id` or `crate`"))
            }
        })?;
    }

    Ok(attrs)
}

fn annotated_ids(fields: &Fields) -> syn::Result<Vec<String>> {
    let mut ids = Vec::new();

    for field in fields {
        for attr in field.attrs.iter().filter(|a| a.path().is_ident("model")) {
            attr.parse_nested_meta(|meta| {
                if !meta.path.is_ident("id") {
                    return Err(meta.error("unsupported field attribute, expected `id`"));
                }

                match &field.ident {
                    Some(ident) => {
                        ids.push(ident.to_string());
                        Ok(())
                    }
                    None => Err(meta.error("identity fields must be named")),
                }
            })?;
        }
    }

    Ok(ids)
}

fn expand_model(input: DeriveInput) -> syn::Result<TokenStream2> {
    let fields = match &input.data {
        Data::Struct(data) => &data.fields,
        _ => {
            return Err(Error::new_spanned(
                &input.ident,
                "Model can only be derived for structs",
            ));
        }
    };

    let ContainerAttrs { name, declared_id, krate } = container_attrs(&input)?;
    let annotated = annotated_ids(fields)?;

    if let (Some(declared), Fields::Named(named)) = (&declared_id, fields) {
        let known = named
            .named
            .iter()
            .filter_map(|f| f.ident.as_ref())
            .any(|ident| *ident == declared.value());

        if !known {
            return Err(Error::new_spanned(
                declared,
                format!("`{}` is not a field of `{}`", declared.value(), input.ident),
            ));
        }
    }

    let declared_call = declared_id.map(|id| quote!(.with_declared_id(#id)));
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics #krate::document::Model for #ident #ty_generics #where_clause {
            fn descriptor() -> #krate::document::ModelDescriptor {
                const ANNOTATED_IDS: &[&str] = &[#(#annotated),*];

                #krate::document::ModelDescriptor::new(#name)
                    #declared_call
                    .with_annotated_ids(ANNOTATED_IDS)
            }
        }
    })
}
