pub mod assessor;
pub mod lifecycle;
pub mod pipeline;
