//! Generated protobuf modules
//!
//! build.rs compiles the schema under protos/; prost emits one file per
//! package (meshtastic.rs). The include is wrapped in a submodule with broad
//! allow() attributes to suppress dead_code warnings for schema surface the
//! gateway does not consume.

pub mod meshtastic {
    #[allow(dead_code, unused_imports, unused_variables, unused_mut, unused_macros)]
    #[allow(clippy::all)]
    #[allow(rustdoc::invalid_html_tags)]
    mod inner {
        include!(concat!(env!("OUT_DIR"), "/meshtastic.rs"));
    }
    pub use inner::*;
}
