mod info;
mod signal;

pub(crate) use self::info::info;
pub(crate) use self::signal::signal;
