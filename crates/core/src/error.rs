use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt::{Debug, Formatter};
use thiserror::Error;

/// The small result taxonomy every fallible operation maps onto.
#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive)]
pub enum ResultCode {
	Ok = 0,
	/// Generic failure, including invalid arguments, invalid state and backend errors.
	Fail = -1,
	NoMemory = -2,
	/// A handle did not resolve to a live object.
	NotFound = -3,
	/// A wait timed out or the requested work has not completed yet.
	NotReady = 1,
}

#[derive(Error)]
pub enum RhiError {
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("{kind} handle does not refer to a live object")]
	InvalidHandle { kind: &'static str },
	#[error("Invalid state: {0}")]
	InvalidState(String),
	#[error("Unsupported: {0}")]
	Unsupported(String),
	#[error("Out of memory: {0}")]
	OutOfMemory(String),
	#[error("Not ready")]
	NotReady,
	#[error("Swapchain is out of date and must be recreated")]
	OutOfDate,
	#[error("Device lost")]
	DeviceLost,
	#[error("{backend} backend error: {message}")]
	Backend { backend: &'static str, message: String },
}

impl Debug for RhiError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self)
	}
}

impl RhiError {
	pub fn code(&self) -> ResultCode {
		match self {
			RhiError::InvalidHandle { .. } => ResultCode::NotFound,
			RhiError::OutOfMemory(_) => ResultCode::NoMemory,
			RhiError::NotReady => ResultCode::NotReady,
			RhiError::InvalidArgument(_)
			| RhiError::InvalidState(_)
			| RhiError::Unsupported(_)
			| RhiError::OutOfDate
			| RhiError::DeviceLost
			| RhiError::Backend { .. } => ResultCode::Fail,
		}
	}

	pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
		RhiError::InvalidArgument(msg.into())
	}

	pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
		RhiError::InvalidState(msg.into())
	}
}

impl From<&RhiError> for ResultCode {
	fn from(value: &RhiError) -> Self {
		value.code()
	}
}

impl<T> From<&RhiResult<T>> for ResultCode {
	fn from(value: &RhiResult<T>) -> Self {
		match value {
			Ok(_) => ResultCode::Ok,
			Err(e) => e.code(),
		}
	}
}

pub type RhiResult<T> = Result<T, RhiError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn error_codes() {
		assert_eq!(RhiError::InvalidHandle { kind: "Fence" }.code(), ResultCode::NotFound);
		assert_eq!(RhiError::OutOfMemory("heap".into()).code(), ResultCode::NoMemory);
		assert_eq!(RhiError::NotReady.code(), ResultCode::NotReady);
		assert_eq!(RhiError::DeviceLost.code(), ResultCode::Fail);
		assert_eq!(RhiError::invalid_state("recording").code(), ResultCode::Fail);
		assert_eq!(ResultCode::from(&RhiResult::Ok(())), ResultCode::Ok);
	}

	#[test]
	fn result_code_repr() {
		assert_eq!(i32::from(ResultCode::NotReady), 1);
		assert_eq!(ResultCode::try_from(-2).ok(), Some(ResultCode::NoMemory));
		assert!(ResultCode::try_from(42).is_err());
	}
}
