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

//! Logging bootstrap for the whole workspace. One `LoggingConfig` is
//! assembled into a log4rs configuration with up to two sinks, a terminal
//! appender and a size-rotated log file, each behind its own level
//! threshold. Initialization is once-only; panics are mirrored into the
//! log with a backtrace.

use std::any::Any;
use std::sync::Once;
use std::{panic, thread};

use backtrace::Backtrace;
use log::{LevelFilter, Record};
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::Append;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::threshold::ThresholdFilter;
use log4rs::filter::{Filter, Response};

use crate::types::{LogLevel, LoggingConfig};

static INIT: Once = Once::new();

const LINE_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} {h({l:<5})} {M} {m}{n}";

/// How many rotated-out log files are kept around.
const KEPT_ROTATIONS: u32 = 16;

fn level_filter(level: &LogLevel) -> LevelFilter {
	match level {
		LogLevel::Error => LevelFilter::Error,
		LogLevel::Warning => LevelFilter::Warn,
		LogLevel::Info => LevelFilter::Info,
		LogLevel::Debug => LevelFilter::Debug,
		LogLevel::Trace => LevelFilter::Trace,
	}
}

/// Only records originating in workspace crates pass; dependencies stay
/// out of the log.
#[derive(Debug)]
struct WorkspaceFilter;

impl Filter for WorkspaceFilter {
	fn filter(&self, record: &Record<'_>) -> Response {
		match record.module_path() {
			Some(path) if path.starts_with("kestrel") => Response::Neutral,
			_ => Response::Reject,
		}
	}
}

/// The file sink: size-rotated when a cap is configured, plain otherwise.
fn file_sink(config: &LoggingConfig) -> Box<dyn Append> {
	let encoder = Box::new(PatternEncoder::new(LINE_PATTERN));
	match config.log_max_size {
		Some(cap) => {
			let roller = FixedWindowRoller::builder()
				.build(&format!("{}.{{}}.gz", config.log_file_path), KEPT_ROTATIONS)
				.expect("rotation pattern");
			let policy =
				CompoundPolicy::new(Box::new(SizeTrigger::new(cap)), Box::new(roller));
			Box::new(
				RollingFileAppender::builder()
					.append(config.log_file_append)
					.encoder(encoder)
					.build(&config.log_file_path, Box::new(policy))
					.expect("open rotating log file"),
			)
		}
		None => Box::new(
			FileAppender::builder()
				.append(config.log_file_append)
				.encoder(encoder)
				.build(&config.log_file_path)
				.expect("open log file"),
		),
	}
}

/// Turns a logging config into the log4rs configuration: one appender
/// per enabled sink, the root level as verbose as the most verbose sink.
fn assemble(config: &LoggingConfig) -> Config {
	let mut sinks: Vec<(&str, LevelFilter, Box<dyn Append>)> = vec![];
	if config.log_to_stdout {
		let console = ConsoleAppender::builder()
			.encoder(Box::new(PatternEncoder::new(LINE_PATTERN)))
			.build();
		sinks.push((
			"term",
			level_filter(&config.stdout_log_level),
			Box::new(console),
		));
	}
	if config.log_to_file {
		sinks.push((
			"logfile",
			level_filter(&config.file_log_level),
			file_sink(config),
		));
	}

	let mut floor = LevelFilter::Off;
	let mut builder = Config::builder();
	let mut root = Root::builder();
	for (name, level, sink) in sinks {
		floor = floor.max(level);
		builder = builder.appender(
			Appender::builder()
				.filter(Box::new(ThresholdFilter::new(level)))
				.filter(Box::new(WorkspaceFilter))
				.build(name, sink),
		);
		root = root.appender(name);
	}
	builder
		.build(root.build(floor))
		.expect("assemble logging configuration")
}

/// Initializes logging from the given configuration. Only the first
/// initialization in a process takes; later calls keep the earlier
/// configuration. The panic hook is (re)installed either way.
pub fn init_logger(config: Option<LoggingConfig>) {
	if let Some(config) = config {
		INIT.call_once(|| {
			log4rs::init_config(assemble(&config)).expect("install logger");
			info!(
				"logging started, stdout {:?}, file {:?}",
				config.stdout_log_level, config.file_log_level
			);
		});
	}
	mirror_panics_to_log();
}

/// Initializes stdout-only debug logging for unit and integration tests.
/// Safe to call from every test; the first caller wins.
pub fn init_test_logger() {
	INIT.call_once(|| {
		let config = LoggingConfig {
			log_to_file: false,
			stdout_log_level: LogLevel::Debug,
			..Default::default()
		};
		log4rs::init_config(assemble(&config)).expect("install test logger");
	});
}

fn payload_text(payload: &(dyn Any + Send)) -> &str {
	if let Some(text) = payload.downcast_ref::<&str>() {
		text
	} else if let Some(text) = payload.downcast_ref::<String>() {
		text.as_str()
	} else {
		"<non-string panic payload>"
	}
}

/// Routes panics through the log as well as stderr, with a backtrace. A
/// panic that only reaches a rotated log file is easy to lose.
fn mirror_panics_to_log() {
	panic::set_hook(Box::new(|info| {
		let thread = thread::current();
		let name = thread.name().unwrap_or("<unnamed>");
		let message = payload_text(info.payload());
		let location = info
			.location()
			.map(|l| format!("{}:{}", l.file(), l.line()))
			.unwrap_or_else(|| "<unknown>".to_string());
		error!(
			"thread '{}' panicked at {}: {}\n{:?}",
			name,
			location,
			message,
			Backtrace::new()
		);
		eprintln!("thread '{}' panicked at {}: {}", name, location, message);
	}));
}
