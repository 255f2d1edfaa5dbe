// Copyright 2026 blockcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared components for blockcache.

/// Assertion helpers that can be hardened with the `strict_assertions` feature.
pub mod assert;
/// Hash builders used for shard routing and indexing.
pub mod hasher;
/// Hierarchical memory consumption tracking.
pub mod mem_tracker;
/// Metrics registry abstractions.
pub mod metrics;
/// An arena that hands out stable tokens.
pub mod slab;
