//! SeaORM entity models
//!
//! Database entities for the Factweave signal store

mod signal;

pub use signal::{
    Entity as SignalEntity,
    Model as Signal,
    ActiveModel as SignalActiveModel,
    Column as SignalColumn,
    FactType,
};
