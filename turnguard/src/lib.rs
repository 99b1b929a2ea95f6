// Copyright 2026 The Turnguard Project
// SPDX-License-Identifier: Apache-2.0

pub mod api;
pub mod config;
pub mod generation;
pub mod history;
pub mod message;
pub mod ratelimit;
pub mod routing;
pub mod safety;
pub mod stream;
pub mod turn;
