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
#![forbid(unsafe_code)]

//! Courier Macro Library
//!
//! Procedural macros for the Courier message bus.
//!
//! # Message Macro
//!
//! [`courier_message`] turns a plain struct into a routable message. The
//! generated `Message` implementation carries the message type name and every
//! declared supertype, flattened once when the type descriptor is built, so a
//! subscriber to a supertype receives publishes of each of its subtypes.
//!
//! ```ignore
//! #[courier_message(event)]
//! pub struct OrderEvent {
//!     pub order_id: String,
//! }
//!
//! #[courier_message(event, name = "sales.OrderPlaced", implements(OrderEvent))]
//! pub struct OrderPlaced {
//!     pub order_id: String,
//!     pub total_cents: u64,
//! }
//! ```

use proc_macro::TokenStream;

use quote::quote;
use syn::{parse_macro_input, DeriveInput, LitStr, Path};

fn has_derive(input: &DeriveInput, trait_name: &str) -> bool {
    input.attrs.iter().any(|attr| {
        if attr.path().is_ident("derive") {
            let mut found = false;
            let _ = attr.parse_nested_meta(|meta| {
                if meta
                    .path
                    .segments
                    .last()
                    .is_some_and(|segment| segment.ident == trait_name)
                {
                    found = true;
                }
                Ok(())
            });
            found
        } else {
            false
        }
    })
}

/// Options parsed from `#[courier_message(...)]`.
#[derive(Default)]
struct MessageConfig {
    /// Explicit wire name; defaults to the module path plus the type name.
    name: Option<LitStr>,
    /// Direct supertypes, each of which must itself implement `Message`.
    implements: Vec<Path>,
    /// Marks the type as an event so endpoints auto-subscribe to it.
    event: bool,
}

impl MessageConfig {
    fn parse(&mut self, meta: &syn::meta::ParseNestedMeta) -> syn::Result<()> {
        if meta.path.is_ident("name") {
            self.name = Some(meta.value()?.parse()?);
            Ok(())
        } else if meta.path.is_ident("implements") {
            meta.parse_nested_meta(|nested| {
                self.implements.push(nested.path);
                Ok(())
            })
        } else if meta.path.is_ident("event") {
            self.event = true;
            Ok(())
        } else {
            Err(meta.error("unsupported courier_message option; expected `name`, `implements` or `event`"))
        }
    }
}

/// Derives everything a struct or enum needs to travel as a Courier message.
///
/// Expands to:
/// - `#[derive(Clone, Debug)]` for whichever of the two is missing
/// - serde `Serialize`/`Deserialize` through the `courier::serde` re-export,
///   unless the type already derives either of them
/// - an implementation of `courier::message::Message`
///
/// # Options
///
/// - `name = "..."`: the type name used on the wire and for subscriptions.
/// - `implements(A, B)`: declared supertypes. Their own ancestors are merged in,
///   so the hierarchy only needs to be declared one level at a time.
/// - `event`: the message is published rather than sent.
#[proc_macro_attribute]
pub fn courier_message(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut config = MessageConfig::default();
    let parser = syn::meta::parser(|meta| config.parse(&meta));
    parse_macro_input!(attr with parser);

    let input = parse_macro_input!(item as DeriveInput);

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let derives = {
        let mut traits = Vec::new();
        if !has_derive(&input, "Clone") {
            traits.push(quote!(Clone));
        }
        if !has_derive(&input, "Debug") {
            traits.push(quote!(Debug));
        }
        let wants_serde = !has_derive(&input, "Serialize") && !has_derive(&input, "Deserialize");
        if wants_serde {
            traits.push(quote!(::courier::serde::Serialize));
            traits.push(quote!(::courier::serde::Deserialize));
        }
        let derive = if traits.is_empty() {
            quote!()
        } else {
            quote!(#[derive(#(#traits),*)])
        };
        if wants_serde {
            quote! {
                #derive
                #[serde(crate = "::courier::serde")]
            }
        } else {
            derive
        }
    };

    let type_name = config.name.as_ref().map_or_else(
        || quote!(concat!(module_path!(), "::", stringify!(#name))),
        |lit| quote!(#lit),
    );
    let parents = config.implements.iter().map(|parent| {
        quote!(.implements(<#parent as ::courier::message::Message>::message_type()))
    });
    let event = if config.event {
        quote!(.as_event())
    } else {
        quote!()
    };

    let expanded = quote! {
        #derives
        #input

        impl #impl_generics ::courier::message::Message for #name #ty_generics #where_clause {
            fn message_type() -> ::courier::message::MessageType {
                ::courier::message::MessageType::new(#type_name)
                    #(#parents)*
                    #event
            }
        }
    };

    TokenStream::from(expanded)
}
