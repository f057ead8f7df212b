pub mod channels;
pub mod decision;
pub mod dispatcher;
