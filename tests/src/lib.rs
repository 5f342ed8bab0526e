//! End-to-end checks of the engine over loopback sockets.

mod support;

mod proxy;
mod scan;
mod session;
