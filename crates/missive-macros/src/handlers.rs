//! `#[handlers(...)]` implementation.
//!
//! Leaves the `impl` block unchanged apart from stripping `#[handlers(skip)]`
//! markers, and appends a `linkme::distributed_slice` static that builds the
//! container.
//!
//! | Option           | Meaning                                              |
//! |------------------|------------------------------------------------------|
//! | `command`        | container of command handlers                        |
//! | `event`          | container of event handlers                          |
//! | `query`          | container of query methods                           |
//! | `self_handling`  | the `impl` belongs to the payload (commands/events)  |
//! | `prefix = "on"`  | name prefix of handler methods, `handle` by default  |
//! | `crate = path`   | path of the framework, `::missive::framework` default|

use proc_macro2::{Span, TokenStream};
use quote::{format_ident, quote};
use syn::{
    Attribute, FnArg, Ident, ImplItem, ImplItemFn, ItemImpl, LitStr, Path, Token, Type,
    Visibility,
    parse::{Parse, ParseStream, Parser, Result},
    spanned::Spanned,
};

/// Default name prefix of handler methods.
const HANDLER_PREFIX: &str = "handle";

// ============================================================================
// Options
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum Kind {
    Command,
    Event,
    Query,
}

struct Options {
    kind: Kind,
    self_handling: bool,
    prefix: String,
    framework: TokenStream,
}

impl Parse for Options {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut kind = None;
        let mut self_handling = false;
        let mut prefix = None;
        let mut framework = None;
        while !input.is_empty() {
            if input.peek(Token![crate]) {
                let keyword: Token![crate] = input.parse()?;
                input.parse::<Token![=]>()?;
                let path: Path = input.parse()?;
                if framework.replace(path).is_some() {
                    return Err(syn::Error::new(keyword.span, "`crate` given twice"));
                }
                if !input.is_empty() {
                    input.parse::<Token![,]>()?;
                }
                continue;
            }

            let ident: Ident = input.parse()?;
            match ident.to_string().as_str() {
                "prefix" => {
                    input.parse::<Token![=]>()?;
                    let value: LitStr = input.parse()?;
                    if value.value().is_empty() {
                        return Err(syn::Error::new(value.span(), "prefix cannot be empty"));
                    }
                    if prefix.replace(value.value()).is_some() {
                        return Err(syn::Error::new(ident.span(), "`prefix` given twice"));
                    }
                }
                "command" | "event" | "query" if kind.is_some() => {
                    return Err(syn::Error::new(ident.span(), "message kind given twice"));
                }
                "command" => kind = Some(Kind::Command),
                "event" => kind = Some(Kind::Event),
                "query" => kind = Some(Kind::Query),
                "self_handling" => self_handling = true,
                other => {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!(
                            "unknown option `{other}`, expected one of: \
                             command, event, query, self_handling, prefix, crate"
                        ),
                    ));
                }
            }
            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }

        let kind = kind.ok_or_else(|| {
            syn::Error::new(
                Span::call_site(),
                "expected a message kind: `command`, `event` or `query`",
            )
        })?;
        if self_handling && kind == Kind::Query {
            return Err(syn::Error::new(
                Span::call_site(),
                "queries cannot be self-handling",
            ));
        }
        Ok(Self {
            kind,
            self_handling,
            prefix: prefix.unwrap_or_else(|| HANDLER_PREFIX.to_string()),
            framework: framework.map_or_else(|| quote!(::missive::framework), |path| quote!(#path)),
        })
    }
}

// ============================================================================
// Method selection
// ============================================================================

fn is_skip_marker(attr: &Attribute) -> bool {
    attr.path().is_ident("handlers")
        && attr
            .parse_args::<Ident>()
            .is_ok_and(|ident| ident == "skip")
}

/// `(is reference, is mutable)` of the receiver, `None` for associated fns.
fn receiver_shape(method: &ImplItemFn) -> Option<(bool, bool)> {
    method
        .sig
        .receiver()
        .map(|receiver| (receiver.reference.is_some(), receiver.mutability.is_some()))
}

fn first_param_is_mut_ref(method: &ImplItemFn) -> bool {
    match method.sig.inputs.iter().nth(1) {
        Some(FnArg::Typed(param)) => {
            matches!(&*param.ty, Type::Reference(reference) if reference.mutability.is_some())
        }
        _ => false,
    }
}

/// Decides whether `method` belongs in the container.
///
/// Methods named like handlers but shaped otherwise are reported instead of
/// silently dropped.
fn select(method: &ImplItemFn, options: &Options) -> Result<bool> {
    let name = method.sig.ident.to_string();
    let named_as_handler = name.starts_with(&options.prefix);

    let fits = match (options.kind, options.self_handling) {
        (Kind::Query, _) => {
            let public = matches!(method.vis, Visibility::Public(_));
            let by_ref = receiver_shape(method) == Some((true, false));
            if !(public && by_ref) {
                return Ok(false);
            }
            true
        }
        (_, false) => {
            receiver_shape(method) == Some((true, false)) && first_param_is_mut_ref(method)
        }
        (_, true) => receiver_shape(method) == Some((true, true)),
    };

    if !fits {
        if named_as_handler {
            let expected = if options.self_handling {
                "self-handling methods take `&mut self` followed by resolved parameters"
            } else {
                "handler methods take `&self`, a `&mut` payload and resolved parameters"
            };
            return Err(syn::Error::new(
                method.sig.span(),
                format!(
                    "`{name}` starts with the handler prefix `{}`; {expected}",
                    options.prefix
                ),
            ));
        }
        return Ok(false);
    }

    let generics = &method.sig.generics.params;
    if !generics
        .iter()
        .all(|param| matches!(param, syn::GenericParam::Lifetime(_)))
    {
        return Err(syn::Error::new(
            method.sig.generics.span(),
            "registered methods cannot have type or const parameters",
        ));
    }
    if method.sig.asyncness.is_some() {
        return Err(syn::Error::new(
            method.sig.asyncness.span(),
            "registered methods must be synchronous",
        ));
    }
    Ok(true)
}

fn static_name(kind: Kind, self_ty: &Type) -> Ident {
    let ty: String = quote!(#self_ty)
        .to_string()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    let kind = match kind {
        Kind::Command => "COMMANDS",
        Kind::Event => "EVENTS",
        Kind::Query => "QUERIES",
    };
    format_ident!("_MISSIVE_{}_{}", kind, ty)
}

// ============================================================================
// Entry point
// ============================================================================

pub fn expand(attr: TokenStream, item: TokenStream) -> Result<TokenStream> {
    let options = Options::parse.parse2(attr)?;
    let mut item: ItemImpl = syn::parse2(item)?;

    if let Some((_, path, _)) = &item.trait_ {
        return Err(syn::Error::new(
            path.span(),
            "#[handlers] expects an inherent impl block",
        ));
    }
    if !item.generics.params.is_empty() {
        return Err(syn::Error::new(
            item.generics.span(),
            "#[handlers] cannot register generic impl blocks",
        ));
    }

    let self_ty = (*item.self_ty).clone();
    let mut registrations = Vec::new();
    for impl_item in &mut item.items {
        let ImplItem::Fn(method) = impl_item else {
            continue;
        };
        let skipped = method.attrs.iter().any(is_skip_marker);
        method.attrs.retain(|attr| !is_skip_marker(attr));
        if skipped || !select(method, &options)? {
            continue;
        }

        let ident = &method.sig.ident;
        let name = ident.to_string();
        registrations.push(match (options.kind, options.self_handling) {
            (Kind::Query, _) => quote!(.query(#name, <#self_ty>::#ident)),
            (_, true) => quote!(.self_handler(#name, <#self_ty>::#ident)),
            (_, false) => quote!(.handler(#name, <#self_ty>::#ident)),
        });
    }

    if registrations.is_empty() {
        return Err(syn::Error::new(
            item.self_ty.span(),
            "#[handlers] found no methods to register",
        ));
    }

    let constructor = match options.kind {
        Kind::Command => quote!(commands),
        Kind::Event => quote!(events),
        Kind::Query => quote!(queries),
    };
    let static_name = static_name(options.kind, &self_ty);
    let fw = &options.framework;

    Ok(quote! {
        #item

        const _: () = {
            #[#fw::linkme::distributed_slice(#fw::HANDLER_CONTAINERS)]
            #[linkme(crate = #fw::linkme)]
            static #static_name: #fw::ContainerFactory = || {
                #fw::HandlerContainer::#constructor::<#self_ty>()
                    .module(::core::module_path!())
                    #(#registrations)*
                    .build()
            };
        };
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand_str(attr: TokenStream, item: TokenStream) -> std::result::Result<String, String> {
        expand(attr, item)
            .map(|tokens| tokens.to_string())
            .map_err(|error| error.to_string())
    }

    #[test]
    fn registers_handler_shaped_methods_only() {
        let out = expand_str(
            quote!(command),
            quote! {
                impl Orders {
                    fn handle_place(&self, cmd: &mut Place, store: Arc<Store>) {}
                    fn helper(&self) -> u32 { 1 }
                    fn new() -> Self { Orders }
                }
            },
        )
        .unwrap();

        assert!(out.contains(":: missive :: framework :: HandlerContainer :: commands :: < Orders >"));
        assert!(out.contains(". handler (\"handle_place\" , < Orders > :: handle_place)"));
        assert!(!out.contains("\"helper\""));
        assert!(!out.contains("\"new\""));
    }

    #[test]
    fn misshaped_handler_is_an_error() {
        let err = expand_str(
            quote!(event),
            quote! {
                impl Audit {
                    fn handle_created(&self, event: &Created) {}
                }
            },
        )
        .unwrap_err();
        assert!(err.contains("`&mut` payload"));
        assert!(err.contains("prefix `handle`"));
    }

    #[test]
    fn prefix_option_moves_the_misshape_check() {
        let item = quote! {
            impl Audit {
                fn handle_created(&self) -> u32 { 0 }
                fn on_created(&self, event: &mut Created) {}
            }
        };
        let out = expand_str(quote!(event, prefix = "on"), item.clone()).unwrap();
        assert!(out.contains(". handler (\"on_created\" , < Audit > :: on_created)"));
        assert!(!out.contains("\"handle_created\""));

        let err = expand_str(quote!(event), item).unwrap_err();
        assert!(err.contains("`handle_created`"));
    }

    #[test]
    fn crate_option_replaces_the_framework_path() {
        let out = expand_str(
            quote!(crate = ::missive_framework, command),
            quote! {
                impl Orders {
                    fn handle_place(&self, cmd: &mut Place) {}
                }
            },
        )
        .unwrap();

        assert!(out.contains(":: missive_framework :: linkme :: distributed_slice"));
        assert!(out.contains(":: missive_framework :: HANDLER_CONTAINERS"));
        assert!(out.contains("linkme (crate = :: missive_framework :: linkme)"));
        assert!(!out.contains(":: missive :: framework"));
    }

    #[test]
    fn self_handling_uses_mut_receiver() {
        let out = expand_str(
            quote!(command, self_handling),
            quote! {
                impl Increment {
                    fn handle(&mut self) { self.value += 1; }
                }
            },
        )
        .unwrap();
        assert!(out.contains(". self_handler (\"handle\" , < Increment > :: handle)"));
    }

    #[test]
    fn queries_register_public_methods() {
        let out = expand_str(
            quote!(query),
            quote! {
                impl Catalog {
                    pub fn price(&self, sku: String) -> i64 { 0 }
                    fn internal(&self) -> i64 { 0 }
                    #[handlers(skip)]
                    pub fn debug_dump(&self) -> String { String::new() }
                }
            },
        )
        .unwrap();

        assert!(out.contains(". query (\"price\" , < Catalog > :: price)"));
        assert!(!out.contains("\"internal\""));
        assert!(!out.contains("\"debug_dump\""));
        assert!(!out.contains("handlers (skip)"));
    }

    #[test]
    fn rejects_bad_options_and_impls() {
        assert!(expand_str(quote!(), quote!(impl A { fn handle(&self, a: &mut B) {} })).is_err());
        assert!(expand_str(quote!(command, query), quote!(impl A {})).is_err());
        assert!(expand_str(quote!(query, self_handling), quote!(impl A {})).is_err());
        assert!(expand_str(quote!(commands), quote!(impl A {})).is_err());
        assert!(expand_str(quote!(command, prefix = ""), quote!(impl A {})).is_err());
        assert!(expand_str(quote!(command, crate = a, crate = b), quote!(impl A {})).is_err());

        let err = expand_str(
            quote!(command),
            quote!(impl Handler for A { fn handle(&self, a: &mut B) {} }),
        )
        .unwrap_err();
        assert!(err.contains("inherent impl"));
    }
}
