use proc_macro::TokenStream;
use quote::quote_spanned;
use syn::{Ident, ItemFn, LitByteStr, LitInt, parse_macro_input, spanned::Spanned};

#[proc_macro_attribute]
pub fn kernel_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mode: syn::Expr = if attr.is_empty() {
        syn::parse_quote! { keos::SchedulingMode::Priority }
    } else {
        let mode = parse_macro_input!(attr as Ident);
        match mode.to_string().as_str() {
            "priority" => syn::parse_quote! { keos::SchedulingMode::Priority },
            "mlfqs" => syn::parse_quote! { keos::SchedulingMode::Mlfqs },
            _ => {
                return syn::Error::new(mode.span(), "expected `priority` or `mlfqs`")
                    .to_compile_error()
                    .into();
            }
        }
    };
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let block = *input_fn.block;
    *input_fn.block = syn::parse_quote! {
        {
            keos::SystemConfigurationBuilder::new()
                .set_scheduling_mode(#mode)
                .boot(move || #block);
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #[test]
        #input_fn
    })
}

#[proc_macro_attribute]
pub fn assert_exit_code(attr: TokenStream, item: TokenStream) -> TokenStream {
    let code = parse_macro_input!(attr as LitInt);
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let name = input_fn.sig.ident.to_string();
    let block = *input_fn.block;
    *input_fn.block = syn::parse_quote! {
        {
            assert_eq!(
                keos::thread::ThreadBuilder::new(#name)
                    .spawn(move || { #block })
                    .join(),
            #code);
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}

#[proc_macro_attribute]
pub fn assert_output(attr: TokenStream, item: TokenStream) -> TokenStream {
    let output = parse_macro_input!(attr as LitByteStr);
    let mut input_fn = parse_macro_input!(item as ItemFn);
    let block = *input_fn.block;
    *input_fn.block = syn::parse_quote! {
        {
            let _return_val = (move || { #block })();
            let output = keos::teletype::take_output();
            assert_eq!(Ok(output.as_str()), core::str::from_utf8(#output));
            _return_val
        }
    };
    TokenStream::from(quote_spanned! { input_fn.span() =>
        #input_fn
    })
}
