//! Implementation of `#[derive(Spanned)]`.

use darling::{util::Flag, FromField};
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{spanned::Spanned as _, Fields, Ident, Index};

/// The contents of a `#[spanned(...)]` attribute.
#[derive(Default, FromField)]
#[darling(default, attributes(spanned))]
struct SpannedAttr {
    /// Leave this field out of the merged span. Needed for plain data like
    /// `String`, `bool` or operator enums.
    skip: Flag,
}

/// One field of a struct or enum variant, as seen by the derive.
struct SpannedField {
    /// `self.<member>` for structs.
    member: TokenStream2,
    /// The name we bind the field to in a `match` arm.
    binding: Ident,
    /// Set by `#[spanned(skip)]`.
    skip: bool,
}

impl SpannedField {
    fn collect(fields: &Fields) -> Vec<SpannedField> {
        fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let skip = SpannedAttr::from_field(field)
                    .unwrap_or_default()
                    .skip
                    .is_present();
                match &field.ident {
                    Some(ident) => SpannedField {
                        member: quote! { #ident },
                        binding: ident.clone(),
                        skip,
                    },
                    None => {
                        let index = Index {
                            index: i as u32,
                            span: field.span(),
                        };
                        SpannedField {
                            member: quote! { #index },
                            binding: format_ident!("f{}", i),
                            skip,
                        }
                    }
                }
            })
            .collect()
    }

    /// The pattern binding this field in a `match` arm. Skipped fields are
    /// ignored.
    fn pattern(&self, named: bool) -> TokenStream2 {
        let binding = &self.binding;
        match (named, self.skip) {
            (true, true) => quote! { #binding: _ },
            (false, true) => quote! { _ },
            (_, false) => quote! { #binding },
        }
    }
}

/// The body of a `span` method that merges `spans`.
fn merge_spans(spans: impl Iterator<Item = TokenStream2>) -> TokenStream2 {
    quote! {
        let mut span = Span::Unknown;
        #( span = span.combined(&Spanned::span(#spans)); )*
        span
    }
}

pub(crate) fn impl_spanned_macro(ast: &syn::DeriveInput) -> TokenStream2 {
    let name = &ast.ident;
    let (impl_generics, ty_generics, where_clause) = &ast.generics.split_for_impl();
    let body = match &ast.data {
        syn::Data::Struct(s) => spanned_body_struct(s),
        syn::Data::Enum(e) => spanned_body_enum(name, e),
        syn::Data::Union(_) => quote! {
            compile_error!("cannot derive Spanned for unions")
        },
    };
    quote! {
        impl #impl_generics Spanned for #name #ty_generics #where_clause {
            fn span(&self) -> Span {
                #body
            }
        }
    }
}

fn spanned_body_struct(data: &syn::DataStruct) -> TokenStream2 {
    let fields = SpannedField::collect(&data.fields);
    merge_spans(fields.iter().filter(|f| !f.skip).map(|f| {
        let member = &f.member;
        quote! { &self.#member }
    }))
}

fn spanned_body_enum(name: &Ident, data: &syn::DataEnum) -> TokenStream2 {
    let arms = data.variants.iter().map(|variant| {
        let variant_name = &variant.ident;
        let fields = SpannedField::collect(&variant.fields);
        let body = merge_spans(fields.iter().filter(|f| !f.skip).map(|f| {
            let binding = &f.binding;
            quote! { #binding }
        }));
        match &variant.fields {
            Fields::Named(_) => {
                let patterns = fields.iter().map(|f| f.pattern(true));
                quote! { #name::#variant_name { #(#patterns),* } => { #body } }
            }
            Fields::Unnamed(_) => {
                let patterns = fields.iter().map(|f| f.pattern(false));
                quote! { #name::#variant_name( #(#patterns),* ) => { #body } }
            }
            Fields::Unit => quote! { #name::#variant_name => Span::Unknown, },
        }
    });
    quote! {
        match self {
            #( #arms )*
        }
    }
}
