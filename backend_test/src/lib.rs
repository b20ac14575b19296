use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, spanned::Spanned, FnArg, Ident, ItemFn, Pat, Signature, Type};

/// The test doubles that can be injected, by type name, and the harness field holding each.
const INJECTABLE: &[(&str, &str)] = &[
    ("Client", "client"),
    ("MemoryRegistry", "registry"),
    ("MemoryLedger", "ledger"),
    ("MemoryAudit", "audit"),
];

/// Transform an asynchronous test into a synchronous one and inject dependencies.
///
/// Injectable dependencies are [`rocket::local::asynchronous::Client`] and the
/// in-memory collaborators `MemoryRegistry`, `MemoryLedger` and `MemoryAudit`
/// from `crate::testing`. The collaborators share state with the ones managed
/// by the client's Rocket instance, so tests can arrange and inspect them.
///
/// `#[backend_test(synced)]` additionally publishes the accumulator root of the
/// registry's leaves to the ledger before the test body runs.
#[proc_macro_attribute]
pub fn backend_test(args: TokenStream, input: TokenStream) -> TokenStream {
    let mut item_fn = parse_macro_input!(input as ItemFn);

    // Extract the injected arguments and reject invalid function signatures.
    let test_args = match check_sig(item_fn.sig.clone()) {
        Ok(args) => args,
        Err(err) => {
            return err.into_compile_error().into();
        }
    };

    // Rename the future so the test can have its original name.
    let name = item_fn.sig.ident.clone();
    let new_name = format_ident!("{}_fut", name);
    item_fn.sig.ident = new_name.clone();

    // Publish the root before the test if asked to.
    let synced = match parse_macro_input!(args as Option<Ident>) {
        Some(arg) if arg == "synced" => true,
        Some(arg) => {
            return syn::Error::new(arg.span(), "Expected no argument or `synced`")
                .into_compile_error()
                .into();
        }
        None => false,
    };

    // Rewrite the test function.
    quote! {
        #[test]
        fn #name() {
            /// The test itself.
            #item_fn

            let runtime = rocket::tokio::runtime::Builder::new_multi_thread()
                .thread_name("rocket-worker-test-thread")
                .worker_threads(2)
                .enable_all()
                .build()
                .unwrap();

            runtime.block_on(async {
                let harness = crate::testing::harness(#synced).await;
                #new_name(#(#test_args),*).await;
            });
        }
    }
    .into()
}

/// Ensure the wrapped test is async, extract parameters to inject, and reject unknown parameters.
fn check_sig(sig: Signature) -> Result<Vec<TokenStream2>, syn::Error> {
    if sig.asyncness.is_none() {
        return Err(syn::Error::new(sig.span(), "Test must be marked `async`"));
    }

    let mut seen: Vec<String> = vec![];
    let mut args = vec![];

    for input in &sig.inputs {
        if let FnArg::Typed(pat_type) = input {
            if let Pat::Ident(_) = &*pat_type.pat {
                if let Type::Path(type_path) = &*pat_type.ty {
                    if let Some(type_ident) = type_path.path.segments.last().map(|s| &s.ident) {
                        let found = INJECTABLE
                            .iter()
                            .find(|(type_name, _)| type_ident == type_name);
                        if let Some((type_name, field)) = found {
                            if seen.iter().any(|s| s == type_name) {
                                return Err(syn::Error::new(
                                    input.span(),
                                    format!("Test cannot accept more than one `{type_name}`"),
                                ));
                            }
                            seen.push(type_name.to_string());
                            let field = format_ident!("{}", field);
                            if *type_name == "Client" {
                                // The client is not `Clone`, so it is moved out of the harness.
                                args.push(quote! { harness.#field });
                            } else {
                                args.push(quote! { harness.#field.clone() });
                            }
                            continue;
                        }
                    }
                }
            }
        }

        return Err(syn::Error::new(
            input.span(),
            "Expected one of `Client`, `MemoryRegistry`, `MemoryLedger` or `MemoryAudit`",
        ));
    }

    Ok(args)
}
