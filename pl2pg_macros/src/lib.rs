//! Derive macros for the `pl2pg` syntax tree.

use proc_macro::TokenStream;

mod spanned;

/// Implement `Spanned` by merging the spans of every field that isn't marked
/// with `#[spanned(skip)]`.
#[proc_macro_derive(Spanned, attributes(spanned))]
pub fn spanned_macro_derive(input: TokenStream) -> TokenStream {
    let ast = syn::parse(input).unwrap();
    spanned::impl_spanned_macro(&ast).into()
}
