#![recursion_limit = "128"]

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

/// Implement `Trace` by tracing every field in declaration order.
/// Fields marked `#[notrace]` are skipped; they must not hold counted edges.
#[proc_macro_derive(Trace, attributes(notrace))]
pub fn derive_trace(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    rcmark_derive_impl::derive_trace(input).into()
}
