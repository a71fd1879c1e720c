//! # kcompat Core
//!
//! The core library for kcompat - a build-configuration tool that lets a
//! single out-of-tree filesystem module source tree compile and behave
//! correctly across many host kernel generations.
//!
//! ## Overview
//!
//! Host kernels and distribution kernels evolve their internal filesystem
//! APIs independently. kcompat probes the target kernel's version and
//! distribution identity, resolves a table of capability flags, and for
//! every capability the host lacks installs a polyfill that reproduces the
//! native API's contract. The module build then sees one stable API surface
//! no matter which kernel it targets.
//!
//! All decisions are made once, at build-configuration time. The resolved
//! configuration is immutable; there is no runtime branching inside the
//! shim layer.
//!
//! ## Basic Usage
//!
//! ```rust,ignore
//! use kcompat_core::{flags, probe, resolver, registry, surface, emit};
//!
//! fn configure() -> Result<String, kcompat_core::error::ShimError> {
//!     let table = flags::stock_table()?;
//!     let rules = probe::stock_probe();
//!
//!     let input = kcompat_core::host::detect();
//!     let pins = rules.probe(&table, &input)?;
//!     let config = resolver::resolve(&table, &input, &pins, &Default::default())?;
//!
//!     let catalog = registry::stock_catalog()?;
//!     let surface = surface::Surface::bind(&catalog, config)?;
//!     Ok(emit::render_header(&surface))
//! }
//! ```
//!
//! ## Architecture
//!
//! The pipeline runs probe -> resolver -> registry -> surface:
//!
//! - [`version`]: kernel version and distribution variant identifiers
//! - [`flags`]: the declarative capability flag table
//! - [`probe`]: pin rules driven by version/variant identification
//! - [`resolver`]: default resolution in dependency order
//! - [`registry`]: the consumer symbol catalog and polyfill bindings
//! - [`polyfills`]: behavioral implementations of the installed polyfills
//! - [`surface`]: the resolved API surface downstream code calls
//! - [`emit`]: rendering the resolved surface as the compat header
//! - [`host`]: best-effort introspection of the running machine
//! - [`error`]: error types and handling

pub mod emit;
pub mod error;
pub mod flags;
pub mod host;
pub mod polyfills;
pub mod probe;
pub mod registry;
pub mod resolver;
pub mod surface;
pub mod version;
