pub mod dispatch;
pub mod sync;
pub mod transitions;
pub mod verification;
pub mod workboard;
