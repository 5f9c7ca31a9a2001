use proc_macro2::{Ident, Span, TokenStream};
use quote::{format_ident, quote};
use syn::{parse_quote, Data, DeriveInput, Field, Fields, Index, Result};

/// `#[notrace]` on a field means it holds no counted edge and is not traced
fn is_traced(field: &Field) -> bool {
    !field.attrs.iter().any(|attr| attr.path.is_ident("notrace"))
}

pub(crate) fn impl_trace(mut item: DeriveInput) -> Result<TokenStream> {
    let trace_code = match &item.data {
        Data::Struct(s) => trace_struct(&s.fields),
        Data::Enum(e) => {
            let arms = e.variants.iter().map(|variant| {
                let name = &variant.ident;
                let (pattern, body) = trace_variant(&variant.fields);
                quote!(Self::#name #pattern => { #body })
            });
            quote! {
                match self {
                    #(#arms)*
                }
            }
        }
        Data::Union(_) => {
            return Err(syn::Error::new_spanned(
                &item.ident,
                "Trace cannot be derived for a union, implement it by hand",
            ))
        }
    };

    let params: Vec<Ident> = item.generics.type_params().map(|p| p.ident.clone()).collect();
    let where_clause = item.generics.make_where_clause();
    for param in params {
        where_clause
            .predicates
            .push(parse_quote!(#param: ::rcmark_heap::Trace));
    }

    let ty = &item.ident;
    let (impl_generics, ty_generics, where_clause) = item.generics.split_for_impl();
    Ok(quote! {
        unsafe impl #impl_generics ::rcmark_heap::Trace for #ty #ty_generics #where_clause {
            #[allow(unused_variables)]
            fn trace(&self, tracer_fn: &mut ::rcmark_heap::TracerFn) {
                #trace_code
            }
        }
    })
}

fn trace_struct(fields: &Fields) -> TokenStream {
    let calls = fields
        .iter()
        .enumerate()
        .filter(|(_, f)| is_traced(f))
        .map(|(i, f)| match &f.ident {
            Some(name) => quote!(::rcmark_heap::Trace::trace(&self.#name, tracer_fn);),
            None => {
                let index = Index::from(i);
                quote!(::rcmark_heap::Trace::trace(&self.#index, tracer_fn);)
            }
        });
    quote!(#(#calls)*)
}

/// Destructuring pattern and body tracing the bound fields of one variant.
fn trace_variant(fields: &Fields) -> (TokenStream, TokenStream) {
    match fields {
        Fields::Named(named) => {
            let traced: Vec<_> = named
                .named
                .iter()
                .filter(|f| is_traced(f))
                .filter_map(|f| f.ident.as_ref())
                .collect();
            (
                quote!({ #(#traced,)* .. }),
                quote!(#(::rcmark_heap::Trace::trace(#traced, tracer_fn);)*),
            )
        }
        Fields::Unnamed(unnamed) => {
            let mut bindings = Vec::new();
            let mut calls = Vec::new();
            for (i, field) in unnamed.unnamed.iter().enumerate() {
                if is_traced(field) {
                    let binding = format_ident!("__field{}", i, span = Span::call_site());
                    calls.push(quote!(::rcmark_heap::Trace::trace(#binding, tracer_fn);));
                    bindings.push(quote!(#binding));
                } else {
                    bindings.push(quote!(_));
                }
            }
            (quote!((#(#bindings),*)), quote!(#(#calls)*))
        }
        Fields::Unit => (quote!(), quote!()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// expansion with whitespace removed, so assertions don't depend on token spacing
    fn expand(item: DeriveInput) -> String {
        impl_trace(item).unwrap().to_string().replace(' ', "")
    }

    #[test]
    fn test_named_fields_skip_notrace() {
        let out = expand(parse_quote! {
            struct Frame {
                locals: Vec<GcEdge<Value>>,
                #[notrace]
                depth: usize,
                parent: Option<GcEdge<Frame>>,
            }
        });
        assert_eq!(out.matches(",tracer_fn)").count(), 2);
        assert!(!out.contains("depth"));
    }

    #[test]
    fn test_tuple_struct() {
        let out = expand(parse_quote! {
            struct Pair(GcEdge<Value>, #[notrace] u32, GcEdge<Value>);
        });
        assert_eq!(out.matches(",tracer_fn)").count(), 2);
    }

    #[test]
    fn test_enum_variants() {
        let out = expand(parse_quote! {
            enum Value {
                Nil,
                Cons(GcEdge<Value>, GcEdge<Value>),
                Closure { env: GcEdge<Env>, #[notrace] arity: u8 },
            }
        });
        assert_eq!(out.matches(",tracer_fn)").count(), 3);
        assert!(out.contains("matchself"));
    }

    #[test]
    fn test_generic_params_get_bounds() {
        let out = expand(parse_quote! {
            struct Cell<T> {
                value: T,
            }
        });
        assert!(out.contains("T:::rcmark_heap::Trace"));
    }

    #[test]
    fn test_union_is_rejected() {
        let item: DeriveInput = parse_quote! {
            union Raw {
                a: u32,
                b: f32,
            }
        };
        assert!(impl_trace(item).is_err());
    }
}
