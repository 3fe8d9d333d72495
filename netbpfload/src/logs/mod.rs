#[allow(clippy::module_inception)]
mod logs;

pub use logs::LoaderLogs;
