#![recursion_limit = "128"]

mod trace;

use proc_macro2::TokenStream;

fn result_to_tokens(result: Result<TokenStream, syn::Error>) -> TokenStream {
    result.unwrap_or_else(|e| e.to_compile_error())
}

pub fn derive_trace(input: syn::DeriveInput) -> TokenStream {
    result_to_tokens(trace::impl_trace(input))
}
