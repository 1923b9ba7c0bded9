// Copyright (c) 2026 CLIO Contributors
//
// SPDX-License-Identifier: MIT
pub mod capabilities;
pub mod registry;
pub mod repair;
mod anthropic;
mod error;
mod google;
mod mock;
mod openai;
mod provider;
mod sse;
mod types;

pub use anthropic::AnthropicProvider;
pub use capabilities::CapabilityRecord;
pub use error::ProviderError;
pub use google::GoogleProvider;
pub use mock::{MockProvider, ScriptedProvider};
pub use openai::{AuthStyle, OpenAiCompatProvider};
pub use provider::{EventStream, Provider, ProviderRequest};
pub use registry::{from_config, get_driver, list_drivers, DriverMeta};
pub use types::*;
