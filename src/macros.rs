/// Declares an RPC service: the trait its handlers implement, a
/// constructor for the fabric-side method table, and a typed client.
///
/// ```ignore
/// service! {
///     service counter {
///         rpc add(AddArgs) returns AddReply;
///     }
/// }
/// ```
///
/// expands to a module `counter` containing a `Service` trait with one
/// method per rpc, `make_service` to pack a handler object into a
/// [`Service`](crate::Service) for [`Server::add_service`](crate::Server::add_service),
/// and a `Client` whose typed methods call `"counter.add"` and so on.
///
/// Only methods of this shape exist; anything else is rejected at the
/// registration site by the trait signature.
#[macro_export]
macro_rules! service {
    ($(#[$svc_attr:meta])* service $svc:ident {
        $($(#[$meth_attr:meta])* rpc $meth:ident($args:ty) returns $reply:ty;)+
    }) => {
        $(#[$svc_attr])*
        pub mod $svc {
            #![allow(unused_imports)]

            use super::*;

            pub trait Service: Send + Sync + 'static {
                $($(#[$meth_attr])* fn $meth(&self, args: $args) -> $reply;)+
            }

            pub fn make_service<T>(handler: T) -> $crate::Service
            where
                T: Service + Clone,
            {
                let mut builder = $crate::ServiceBuilder::new(stringify!($svc));
                $(
                    let handler_ = handler.clone();
                    builder.add_method(
                        stringify!($meth),
                        Box::new(move |req: &[u8], rsp: &mut Vec<u8>| {
                            // a mangled argument decodes to the zero value
                            let args = $crate::codec::decode(req).unwrap_or_default();
                            let reply = handler_.$meth(args);
                            let _ = $crate::codec::encode(&reply, rsp);
                        }),
                    );
                )+
                builder.build()
            }

            #[derive(Clone)]
            pub struct Client {
                end: $crate::ClientEnd,
            }

            impl Client {
                pub fn new(end: $crate::ClientEnd) -> Client {
                    Client { end }
                }

                $(
                    $(#[$meth_attr])*
                    pub fn $meth(&self, args: &$args) -> $crate::Result<$reply> {
                        self.end
                            .call(concat!(stringify!($svc), ".", stringify!($meth)), args)
                    }
                )+
            }
        }
    };
}
