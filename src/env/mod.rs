pub mod host;

pub use host::HostDescriptor;
