//! Build script for nasnet-core.
//!
//! Recompiles when migration files change so the `SQLx` `migrate!()` macro
//! picks up schema changes in the migrations directory.

fn main() {
    println!("cargo:rerun-if-changed=migrations");
}
