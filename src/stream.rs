use std::fmt;

use serde_json::Value;

use crate::{
    validate::{StreamableValidator, Validator},
    Result, StreamConfig, StreamError, StreamOptions, StreamWriter,
};

const DEFAULT_TRACE_TYPE: &str = "scatter";
const NOT_OPENED: &str =
    "stream has not been opened yet, cannot write to a closed connection; call open() first";

/// Trace-level interface to a live graph.
///
/// Each trace of a streaming graph carries a stream id. A `Stream` created
/// with that id appends data points to the trace in real time:
///
/// ```no_run
/// use plotly_stream::{Stream, StreamConfig};
/// use serde_json::json;
///
/// let mut stream = Stream::new("my-stream-id", StreamConfig::default());
/// stream.open()?;
/// stream.write(json!({"x": 1, "y": 1}), None, true)?;
/// stream.close()?;
/// # Ok::<(), plotly_stream::StreamError>(())
/// ```
pub struct Stream {
    stream_id: String,
    config: StreamConfig,
    options: StreamOptions,
    validator: Box<dyn Validator>,
    writer: Option<StreamWriter>,
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("stream_id", &"<redacted>")
            .field("config", &self.config)
            .field("writer", &self.writer)
            .finish()
    }
}

impl Stream {
    pub fn new(stream_id: impl Into<String>, config: StreamConfig) -> Self {
        Self {
            stream_id: stream_id.into(),
            config,
            options: StreamOptions::default(),
            validator: Box::new(StreamableValidator),
            writer: None,
        }
    }

    /// Options used for the writer created by the next `open()`.
    pub fn with_options(mut self, opts: StreamOptions) -> Self {
        self.options = opts;
        self
    }

    /// Server statuses on which the stream quietly reconnects.
    pub fn with_reconnect_on(mut self, statuses: impl IntoIterator<Item = Option<u16>>) -> Self {
        self.options.ignore_status_codes = statuses.into_iter().collect();
        self
    }

    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// The underlying writer once the stream has been opened.
    pub fn writer(&self) -> Option<&StreamWriter> {
        self.writer.as_ref()
    }

    /// Opens the streaming connection.
    ///
    /// Calling it again on an open stream reconnects if the connection has
    /// ended, reporting the failure that ended it.
    pub fn open(&mut self) -> Result<()> {
        let writer = self.writer.get_or_insert_with(|| {
            StreamWriter::new(self.stream_id.clone(), &self.config)
                .with_options(self.options.clone())
        });
        writer.open()
    }

    /// Writes one trace update, optionally with a layout update.
    ///
    /// `trace` must be a JSON object; its `type` defaults to `"scatter"` and
    /// is used for validation only. When `validate` is set the trace and
    /// layout are checked before anything is queued.
    pub fn write(&mut self, trace: Value, layout: Option<Value>, validate: bool) -> Result<()> {
        let Value::Object(mut object) = trace else {
            return Err(StreamError::Validation {
                trace_type: DEFAULT_TRACE_TYPE.to_owned(),
                message: "a trace must be a JSON object".to_owned(),
            });
        };
        let trace_type = match object.remove("type") {
            None => DEFAULT_TRACE_TYPE.to_owned(),
            Some(Value::String(name)) => name,
            Some(other) if validate => {
                return Err(StreamError::Validation {
                    trace_type: other.to_string(),
                    message: "trace 'type' must be a string".to_owned(),
                })
            }
            Some(_) => DEFAULT_TRACE_TYPE.to_owned(),
        };

        if validate {
            let invalid = |message: String| StreamError::Validation {
                trace_type: trace_type.clone(),
                message,
            };
            self.validator
                .validate(&object, &trace_type)
                .map_err(|why| invalid(format!("part of the data object is invalid: {why}")))?;
            self.validator
                .validate_stream(&object, &trace_type)
                .map_err(|why| invalid(format!("this data cannot be streamed yet: {why}")))?;
            if let Some(layout) = &layout {
                self.validator
                    .validate_layout(layout)
                    .map_err(|why| invalid(format!("the layout is invalid: {why}")))?;
            }
        }

        if let Some(layout) = layout {
            object.insert("layout".to_owned(), layout);
        }

        self.opened_writer()?.write(Value::Object(object))
    }

    /// Sends an empty keep-alive chunk.
    ///
    /// The server closes streams after about a minute without data; call this
    /// between writes that are more than 30 seconds apart.
    pub fn heartbeat(&mut self) -> Result<()> {
        self.opened_writer()?.write("")
    }

    pub fn close(&mut self) -> Result<()> {
        self.opened_writer()?.close();
        Ok(())
    }

    fn opened_writer(&mut self) -> Result<&mut StreamWriter> {
        self.writer
            .as_mut()
            .ok_or_else(|| StreamError::NotOpen(NOT_OPENED.to_owned()))
    }
}
