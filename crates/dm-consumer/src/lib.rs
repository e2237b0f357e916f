//! The message consumer (C5): a backend-agnostic loop over whichever of
//! the three interchangeable info-message sources configuration selects,
//! translating each delivered message into a batch of `REFRESH_ENTITY`
//! scheduler tasks, one per affected entity.

mod backend;
mod consumer;
mod message;
mod source;

pub use backend::{BrokerSource, CloudSource, DatabaseSource};
pub use consumer::Consumer;
pub use message::InfoMessage;
pub use source::{Delivery, MessageSource};
