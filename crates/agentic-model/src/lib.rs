// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider-facing message wire format and the [`ModelProvider`] streaming
//! contract (C5).
//!
//! This crate defines *only* the seam between the driver and a model
//! backend: the message/content types sent in a [`CompletionRequest`], the
//! chunked [`ResponseEvent`] stream a provider must produce, and a
//! deterministic [`MockProvider`]/[`ScriptedMockProvider`] pair for tests.
//! Concrete HTTP transports for specific model vendors are external
//! collaborators and are deliberately not implemented here — production
//! binaries plug in their own [`ModelProvider`] impls.

pub mod catalog;
pub mod sanitize;
mod types;
mod provider;
mod mock;

pub use catalog::{InputModality, ModelCatalogEntry};
pub use mock::{MockProvider, ScriptedMockProvider};
pub use provider::{ModelProvider, ResponseStream};
pub use types::*;
