use parking_lot::Mutex;

/// Collects usage errors only detectable while executing, like a driver validation layer.
#[derive(Debug)]
pub struct Validation {
	enabled: bool,
	messages: Mutex<Vec<String>>,
}

impl Validation {
	pub fn new(enabled: bool) -> Self {
		Self {
			enabled,
			messages: Mutex::new(Vec::new()),
		}
	}

	pub fn enabled(&self) -> bool {
		self.enabled
	}

	pub fn report(&self, message: String) {
		if self.enabled {
			log::error!("soft validation: {message}");
			self.messages.lock().push(message);
		}
	}

	/// All messages reported since the last call.
	pub fn take_messages(&self) -> Vec<String> {
		std::mem::take(&mut *self.messages.lock())
	}

	pub fn message_count(&self) -> usize {
		self.messages.lock().len()
	}
}
