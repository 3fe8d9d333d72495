//! Typed `bpf(2)` map helpers and the loader's error types, shared by the
//! `netbpfload` binary and other network components.

pub mod bpf;
pub mod errors;
