//! # Evocode Derive Macros
//!
//! This crate provides `#[derive(Evolve)]` for `evocode`. The derive implements `Evolve`
//! through `evocode::evolve_named!` and emits a `Register` impl that fills the type registry:
//!
//! * **Structs** become records. Every field carries `#[evolve(id = N)]`, or `#[evolve(skip)]`
//!   to leave it out of the data (it then keeps its `Default` value when read).
//! * **Enums with data** become unions. Every variant carries `#[evolve(id = N)]` and is
//!   either a unit variant or a newtype variant.
//! * **C-like enums** (unit variants only, no IDs) are carried as an integer, `i32` unless
//!   `#[evolve(repr = "...")]` says otherwise. Unknown values read as the `Default` variant.
//!
//! Every derived type must implement `Default`. Generic types are not supported.
//!
//! Compatible with `syn 2.0`.

use proc_macro::TokenStream;
use proc_macro2::Span;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, LitInt, LitStr};

/// Derives `evocode::Evolve` and `evocode::registry::Register`.
#[proc_macro_derive(Evolve, attributes(evolve))]
pub fn derive_evolve(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Evolve cannot be derived for generic types; implement Register by hand",
        ));
    }

    let register_body = match &input.data {
        Data::Struct(ds) => generate_record(name, &ds.fields)?,
        Data::Enum(de) => {
            if de.variants.is_empty() {
                return Err(syn::Error::new(
                    name.span(),
                    "Evolve cannot be derived for empty enums; they have no value to read or write",
                ));
            }
            let variants: Vec<&syn::Variant> = de.variants.iter().collect();
            if is_c_like(&variants)? {
                let repr = parse_container(&input.attrs)?;
                generate_enum_data(name, &variants, &repr)?
            } else {
                generate_union(name, &variants)?
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new(name.span(), "Evolve does not support Rust unions"));
        }
    };

    Ok(quote! {
        evocode::evolve_named!(#name);

        impl evocode::registry::Register for #name {
            fn register(types: &mut evocode::registry::TypeRegistry) {
                #register_body
                types.add_default_value_getter::<Self>(<Self as ::core::default::Default>::default);
            }
        }
    })
}

// --- Attribute Parsing ---

#[derive(Default)]
struct MemberAttr {
    id: Option<u32>,
    skip: bool,
}

/// Parses `#[evolve(id = N)]` / `#[evolve(skip)]`.
fn parse_member(attrs: &[Attribute]) -> syn::Result<MemberAttr> {
    let mut out = MemberAttr::default();
    for attr in attrs {
        if attr.path().is_ident("evolve") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("id") {
                    let lit: LitInt = meta.value()?.parse()?;
                    out.id = Some(lit.base10_parse()?);
                    return Ok(());
                }
                if meta.path.is_ident("skip") {
                    out.skip = true;
                    return Ok(());
                }
                Err(meta.error("Unknown evolve attribute key. Supported: id, skip"))
            })?;
        }
    }
    Ok(out)
}

/// Parses `#[evolve(repr = "i32")]` on a C-like enum.
fn parse_container(attrs: &[Attribute]) -> syn::Result<syn::Type> {
    let mut repr: Option<syn::Type> = None;
    for attr in attrs {
        if attr.path().is_ident("evolve") {
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("repr") {
                    let s: LitStr = meta.value()?.parse()?;
                    repr = Some(s.parse()?);
                    return Ok(());
                }
                Err(meta.error("Unknown evolve attribute key on an enum. Supported: repr"))
            })?;
        }
    }
    Ok(repr.unwrap_or_else(|| syn::parse_quote!(i32)))
}

fn is_c_like(variants: &[&syn::Variant]) -> syn::Result<bool> {
    let all_unit = variants.iter().all(|v| matches!(v.fields, Fields::Unit));
    if !all_unit {
        return Ok(false);
    }
    for v in variants {
        if parse_member(&v.attrs)?.id.is_some() {
            return Ok(false);
        }
    }
    Ok(true)
}

fn check_unique(ids: &[(u32, Span)]) -> syn::Result<()> {
    for (i, (id, span)) in ids.iter().enumerate() {
        if ids[..i].iter().any(|(seen, _)| seen == id) {
            return Err(syn::Error::new(*span, format!("duplicate evolve id {id}")));
        }
    }
    Ok(())
}

// --- Generator: Record ---

struct RecordMember {
    id: u32,
    access: proc_macro2::TokenStream,
    ty: syn::Type,
}

fn generate_record(name: &syn::Ident, fields: &Fields) -> syn::Result<proc_macro2::TokenStream> {
    let mut members = Vec::new();
    for (index, field) in fields.iter().enumerate() {
        let attr = parse_member(&field.attrs)?;
        if attr.skip {
            continue;
        }
        let access = match &field.ident {
            Some(ident) => quote! { #ident },
            None => {
                let index = syn::Index::from(index);
                quote! { #index }
            }
        };
        let id = attr.id.ok_or_else(|| {
            syn::Error::new_spanned(field, "field needs #[evolve(id = N)] or #[evolve(skip)]")
        })?;
        members.push(RecordMember {
            id,
            access,
            ty: field.ty.clone(),
        });
    }
    check_unique(
        &members
            .iter()
            .map(|m| (m.id, name.span()))
            .collect::<Vec<_>>(),
    )?;
    // Writers emit members in ascending ID order, the order of the schema.
    members.sort_by_key(|m| m.id);

    let member_types = members.iter().map(|m| {
        let (id, ty) = (m.id, &m.ty);
        quote! { types.add_member_type::<Self, #ty>(#id); }
    });
    let bindings = members.iter().map(|m| {
        let (id, access) = (m.id, &m.access);
        quote! { .member(#id, |value| &mut value.#access) }
    });
    let writes = members.iter().map(|m| {
        let access = &m.access;
        quote! { evocode::Evolve::write(&value.#access, out)?; }
    });

    Ok(quote! {
        #(#member_types)*
        types.add_reader_factory::<Self>(evocode::registry::ReaderFactory::Record(
            evocode::registry::RecordFactory::<Self>::new()
                #(#bindings)*
        ));
        types.add_writer::<Self>(|value, out| {
            #(#writes)*
            ::core::result::Result::Ok(())
        });
    })
}

// --- Generator: Union ---

fn generate_union(name: &syn::Ident, variants: &[&syn::Variant]) -> syn::Result<proc_macro2::TokenStream> {
    let mut ids = Vec::new();
    let mut member_types = Vec::new();
    let mut cases = Vec::new();
    let mut writes = Vec::new();

    for v in variants {
        let attr = parse_member(&v.attrs)?;
        let vname = &v.ident;
        let id = attr
            .id
            .ok_or_else(|| syn::Error::new_spanned(v, "variant needs #[evolve(id = N)]"))?;
        ids.push((id, vname.span()));
        match &v.fields {
            Fields::Unit => {
                member_types.push(quote! { types.add_member_type::<Self, ()>(#id); });
                cases.push(quote! { .case::<()>(#id, |_| #name::#vname) });
                writes.push(quote! {
                    #name::#vname => {
                        out.write_var_u64(#id as u64);
                        ::core::result::Result::Ok(())
                    }
                });
            }
            Fields::Unnamed(f) if f.unnamed.len() == 1 => {
                let ty = &f.unnamed[0].ty;
                member_types.push(quote! { types.add_member_type::<Self, #ty>(#id); });
                cases.push(quote! { .case::<#ty>(#id, #name::#vname) });
                writes.push(quote! {
                    #name::#vname(inner) => {
                        out.write_var_u64(#id as u64);
                        evocode::Evolve::write(inner, out)
                    }
                });
            }
            _ => {
                return Err(syn::Error::new_spanned(
                    v,
                    "union variants must be unit or newtype variants",
                ));
            }
        }
    }
    check_unique(&ids)?;

    Ok(quote! {
        #(#member_types)*
        types.add_reader_factory::<Self>(evocode::registry::ReaderFactory::Union(
            evocode::registry::UnionFactory::<Self>::new()
                #(#cases)*
        ));
        types.add_writer::<Self>(|value, out| match value {
            #(#writes)*
        });
    })
}

// --- Generator: C-like Enum ---

fn generate_enum_data(
    name: &syn::Ident,
    variants: &[&syn::Variant],
    repr: &syn::Type,
) -> syn::Result<proc_macro2::TokenStream> {
    let mut to_arms = Vec::new();
    let mut from_arms = Vec::new();
    let mut next: proc_macro2::TokenStream = quote! { 0 };
    for v in variants {
        let vname = &v.ident;
        let value = match &v.discriminant {
            Some((_, expr)) => quote! { (#expr) },
            None => next.clone(),
        };
        to_arms.push(quote! { #name::#vname => (#value) as #repr, });
        from_arms.push(quote! { raw if raw == (#value) as #repr => #name::#vname, });
        next = quote! { (#value) + 1 };
    }

    Ok(quote! {
        types.add_enum_data::<Self, #repr>(
            |value| match value {
                #(#to_arms)*
            },
            |raw| match raw {
                #(#from_arms)*
                _ => <Self as ::core::default::Default>::default(),
            },
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand_err(input: DeriveInput) -> String {
        match expand(&input) {
            Ok(_) => String::new(),
            Err(e) => e.to_string(),
        }
    }

    #[test]
    fn empty_enums_are_rejected() {
        let msg = expand_err(syn::parse_quote! {
            enum Never {}
        });
        assert!(msg.contains("empty enums"), "{msg}");
    }

    #[test]
    fn generics_and_missing_ids_are_rejected() {
        let msg = expand_err(syn::parse_quote! {
            struct Wrapper<T> { #[evolve(id = 1)] inner: T }
        });
        assert!(msg.contains("generic"), "{msg}");

        let msg = expand_err(syn::parse_quote! {
            struct Point { x: i32 }
        });
        assert!(msg.contains("#[evolve(id = N)]"), "{msg}");
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let msg = expand_err(syn::parse_quote! {
            enum Shape { #[evolve(id = 1)] Dot, #[evolve(id = 1)] Line(f64) }
        });
        assert!(msg.contains("duplicate evolve id 1"), "{msg}");
    }

    #[test]
    fn c_like_enums_expand() {
        let input: DeriveInput = syn::parse_quote! {
            #[evolve(repr = "u8")]
            enum Color { Red, Green = 5, Blue }
        };
        let tokens = expand(&input).map(|t| t.to_string()).unwrap_or_default();
        assert!(tokens.contains("add_enum_data"), "{tokens}");
    }
}
