// Copyright 2021 The Kestrel Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Notification plumbing connecting sync progress to its consumers. The
//! core emits structured events through an abstract sink; the default
//! sink writes them to the log, and a queued wrapper offloads delivery
//! to its own worker thread.

use std::fmt::Write as _;
use std::sync::Arc;
use std::thread;

use crate::util::{Timeout, WorkQueue};

/// What kind of information a notification carries.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum NotificationKind {
	/// Free-form diagnostic
	Log,
	/// Something happened once
	Event,
	/// A periodically refreshed figure
	Update,
}

/// A notification value: text or a signed number.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Value {
	/// Text payload
	Text(String),
	/// Numeric payload
	Int(i64),
}

/// A structured notification: a kind, a path such as `sync/headers`, and
/// a small map of named values.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Notification {
	/// What kind of notification this is
	pub kind: NotificationKind,
	/// Dotted-path topic
	pub path: String,
	/// Named payload values
	pub values: Vec<(String, Value)>,
}

impl Notification {
	/// An update notification on the given path.
	pub fn update(path: &str, values: Vec<(String, Value)>) -> Notification {
		Notification {
			kind: NotificationKind::Update,
			path: path.to_string(),
			values,
		}
	}

	/// An event notification on the given path.
	pub fn event(path: &str, values: Vec<(String, Value)>) -> Notification {
		Notification {
			kind: NotificationKind::Event,
			path: path.to_string(),
			values,
		}
	}
}

/// Consumer of notifications.
pub trait NotificationSink: Send + Sync {
	/// Delivers one notification.
	fn emit(&self, notification: Notification);
}

/// Default sink writing notifications through the log.
pub struct LogSink;

impl NotificationSink for LogSink {
	fn emit(&self, notification: Notification) {
		let mut line = String::new();
		for (name, value) in &notification.values {
			match value {
				Value::Text(text) => {
					let _ = write!(line, " {}={}", name, text);
				}
				Value::Int(int) => {
					let _ = write!(line, " {}={}", name, int);
				}
			}
		}
		match notification.kind {
			NotificationKind::Log | NotificationKind::Update => {
				debug!("{}:{}", notification.path, line)
			}
			NotificationKind::Event => info!("{}:{}", notification.path, line),
		}
	}
}

/// A sink that hands notifications to a dedicated worker thread, so the
/// emitting thread never blocks on delivery.
pub struct QueuedSink {
	queue: Arc<WorkQueue<Notification>>,
	worker: Option<thread::JoinHandle<()>>,
}

impl QueuedSink {
	/// Wraps a sink with a delivery worker.
	pub fn new(inner: Arc<dyn NotificationSink>) -> QueuedSink {
		let queue = Arc::new(WorkQueue::new());
		let worker_queue = queue.clone();
		let worker = thread::Builder::new()
			.name("notify-sink".to_string())
			.spawn(move || {
				while let Some(notification) = worker_queue.wait_pop(Timeout::infinite()) {
					inner.emit(notification);
				}
			})
			.expect("spawn notification worker");
		QueuedSink {
			queue,
			worker: Some(worker),
		}
	}
}

impl NotificationSink for QueuedSink {
	fn emit(&self, notification: Notification) {
		if !self.queue.push(notification) {
			trace!("notification dropped, sink stopped");
		}
	}
}

impl Drop for QueuedSink {
	fn drop(&mut self) {
		self.queue.stop();
		if let Some(handle) = self.worker.take() {
			let _ = handle.join();
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::util::Mutex;

	struct Collector(Mutex<Vec<Notification>>);

	impl NotificationSink for Collector {
		fn emit(&self, notification: Notification) {
			self.0.lock().push(notification);
		}
	}

	#[test]
	fn queued_sink_delivers_in_order_until_stopped() {
		let collector = Arc::new(Collector(Mutex::new(vec![])));
		{
			let sink = QueuedSink::new(collector.clone());
			for i in 0..10 {
				sink.emit(Notification::update(
					"sync/headers",
					vec![("height".to_string(), Value::Int(i))],
				));
			}
			// dropping joins the worker
		}
		let seen = collector.0.lock();
		assert!(seen.len() <= 10);
		for (i, notification) in seen.iter().enumerate() {
			assert_eq!(notification.values[0].1, Value::Int(i as i64));
		}
	}
}
