// Copyright 2016 Mozilla Foundation
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

//! `ccrs`: a transparent front-end to a C/C++ compiler that reuses the
//! object file from a previous, identical compilation instead of
//! recompiling. See `README.md` and `DESIGN.md` for the architecture;
//! the module layout below mirrors spec §2 "System overview" component
//! by component.

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod cache;
pub mod compiler;
pub mod config;
pub mod driver;
pub mod errors;
pub mod hasher;
pub mod manifest;
pub mod scanner;
pub mod stats;
pub mod util;

pub use crate::config::Config;
pub use crate::hasher::FileHash;
