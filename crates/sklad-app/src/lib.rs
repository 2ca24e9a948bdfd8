// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

pub mod cache;
pub mod columns;
pub mod edit;
pub mod error;
pub mod forms;
pub mod ids;
pub mod lookup;
pub mod model;
pub mod money;
pub mod mutation;
pub mod query;
pub mod report;
pub mod state;

pub use cache::*;
pub use columns::*;
pub use edit::*;
pub use error::*;
pub use forms::*;
pub use ids::*;
pub use lookup::*;
pub use model::*;
pub use money::*;
pub use mutation::*;
pub use query::*;
pub use report::*;
pub use state::*;
