// This file is part of devattach, an application to attach FPGA peripherals through device-tree overlays and expose them to userspace.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// devattach is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// devattach is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! Procedural macros for devattach.
//!
//! `#[driver(compatible = "...", name = "...")]` turns a `Default` driver struct into a
//! registrable platform driver: it keeps the struct as written and adds `COMPATIBLE`, `NAME`
//! and a `register_driver(bus, module)` associated function.

use proc_macro::TokenStream;
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::{ItemStruct, LitStr, parse_macro_input};

#[derive(Default)]
struct DriverArgs {
    compatible: Option<LitStr>,
    name: Option<LitStr>,
}

impl DriverArgs {
    fn parse(&mut self, meta: ParseNestedMeta) -> syn::Result<()> {
        if meta.path.is_ident("compatible") {
            self.compatible = Some(meta.value()?.parse()?);
            Ok(())
        } else if meta.path.is_ident("name") {
            self.name = Some(meta.value()?.parse()?);
            Ok(())
        } else {
            Err(meta.error("unsupported driver property, expected `compatible` or `name`"))
        }
    }
}

#[proc_macro_attribute]
pub fn driver(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut args = DriverArgs::default();
    let parser = syn::meta::parser(|meta| args.parse(meta));
    parse_macro_input!(attr with parser);
    let item = parse_macro_input!(item as ItemStruct);

    let Some(compatible) = args.compatible else {
        return syn::Error::new_spanned(&item.ident, "missing `compatible = \"...\"`")
            .to_compile_error()
            .into();
    };
    let name = args
        .name
        .unwrap_or_else(|| LitStr::new(&item.ident.to_string(), item.ident.span()));
    let ident = &item.ident;
    let (impl_generics, ty_generics, where_clause) = item.generics.split_for_impl();

    quote! {
        #item

        impl #impl_generics #ident #ty_generics #where_clause {
            pub const COMPATIBLE: &'static str = #compatible;
            pub const NAME: &'static str = #name;

            /// Register this driver on `bus` on behalf of `module`.
            pub fn register_driver(
                bus: &crate::drivers::bus::PlatformBus,
                module: &::std::sync::Arc<crate::drivers::module::DriverModule>,
            ) -> ::std::result::Result<(), crate::error::AttachError> {
                bus.register_driver(
                    module,
                    Self::COMPATIBLE,
                    ::std::sync::Arc::new(<Self as ::std::default::Default>::default()),
                )
            }
        }
    }
    .into()
}
