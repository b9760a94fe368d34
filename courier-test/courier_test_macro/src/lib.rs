/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

use proc_macro::TokenStream;

use quote::quote;
use syn::{parse_macro_input, ItemFn};

/// Runs an `async fn` test on a fresh multi-threaded tokio runtime.
///
/// Panics raised anywhere in the runtime (including spawned endpoint workers)
/// are recorded by a panic hook and re-raised on the test thread with
/// their location, so a failing handler task fails the test instead of being
/// swallowed by the worker that ran it.
#[proc_macro_attribute]
pub fn courier_test(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    let vis = &input.vis;
    let sig = &input.sig;
    let body = &input.block;
    let attrs = &input.attrs;
    let name = &sig.ident;
    let inputs = &sig.inputs;
    let output = &sig.output;

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            sig.fn_token,
            "courier_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }

    let async_name = syn::Ident::new(&format!("__{name}_async"), name.span());

    let output = quote! {
        #[test]
        #(#attrs)*
        #vis fn #name() #output {
            use std::sync::Arc;
            use ::courier_test::__private::{parking_lot, tokio, tracing};

            // First panic observed on any runtime thread, as (location, message).
            let first_panic: Arc<parking_lot::Mutex<Option<(String, String)>>> = Arc::default();
            let recorder = Arc::clone(&first_panic);
            let previous_hook = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                let payload = info.payload();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic without a message".to_string())
                    .trim()
                    .replace('\n', " ");
                let location = info
                    .location()
                    .map_or_else(|| "unknown location".to_string(), |l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
                tracing::error!(%location, "panic in test: {}", message);
                recorder.lock().get_or_insert((location, message));
                previous_hook(info);
            }));

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .expect("failed to build test runtime");
            let result = runtime.block_on(async {
                let span = tracing::info_span!("courier_test", name = stringify!(#name));
                let _entered = span.enter();
                #async_name().await
            });
            runtime.shutdown_timeout(std::time::Duration::from_secs(5));

            if let Some((location, message)) = first_panic.lock().take() {
                panic!("panic at {location}: {message}");
            }
            result
        }

        async fn #async_name(#inputs) #output #body
    };

    output.into()
}
