//! Osiris Assembly Bundling
//!
//! The osiris bundle module packages the managed assemblies of an application
//! for Android. It takes the final, per-architecture set of assemblies and
//! produces the files the Android package manager accepts in the native
//! library directory of a package, together with a native index the runtime
//! uses to locate every assembly at process start without going through the
//! archive layer of the package.
//!
//! Model
//! -----
//!
//! Packaging is a pipeline of independent phases, each implemented in its own
//! module:
//!
//!  * [`collect`]: group the resolved assembly list by architecture and
//!    replicate satellite assemblies into every architecture.
//!  * [`plan`]: assign descriptor indices to compressible assemblies and
//!    register the plan in a build-scoped registry.
//!  * [`compress`]: compress assemblies according to the plan.
//!  * [`select`]: choose between discrete containers and consolidated blobs.
//!  * [`dso`] and [`blob`]: write the native containers.
//!  * [`index`]: generate the native index as LLVM IR.
//!  * [`update`]: write outputs only if their content changed.
//!
//! Records are allocated once per architecture in an arena (see
//! [`assembly`]). Phases refer to records by index and return their results as
//! separate columns, so no phase mutates data another phase reads.
//!
//! The compression plan is the only state shared across architectures. It is
//! written during planning, then sealed, and only read afterwards. Once
//! sealed, all architectures are packaged in parallel.
//!
//! Configuration
//! -------------
//!
//! The bundle module uses the Osiris Bundle Manifest for configuration. The
//! manifest is a TOML-formatted file usually called `osiris-bundle.toml`
//! placed in the application repository. The `osiris-bundle` command-line
//! tool parses the manifest and exposes all operations of [`op`].
//!
//! Supported Platforms
//! -------------------
//!
//!  * [Android](platform::android)

pub mod assembly;
pub mod blob;
pub mod collect;
pub mod compress;
pub mod dso;
pub mod index;
pub mod manifest;
pub mod plan;
pub mod select;
pub mod update;

/// Bundle Operations
///
/// The `op` module is a collection of all operations that can be performed via
/// the command-line interface. Each operation is implemented in a submodule
/// and can be used independently.
pub mod op {
    pub mod package;
    pub mod wrap;
}

/// Platform Integration
///
/// The `platform` module documents how assemblies are integrated into native
/// application packages for each respective platform.
pub mod platform {
    pub mod android;
}
