// SPDX-License-Identifier: MIT

pub mod db;
pub mod schema;
pub mod token_registry;
