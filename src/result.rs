use std::result;

use crate::error::RecordError;

pub type Result<T> = result::Result<T, RecordError>;
