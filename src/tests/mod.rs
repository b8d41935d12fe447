mod helpers;
mod scheduler;

pub(crate) use helpers::*;
