//! Line-framed serial transport for direct-attached controllers. A
//! background task owns the read half and routes complete lines to the
//! single in-flight command; printers are polled in the Marlin idiom,
//! routers and cutters with a GRBL-style status report.

use crate::{
    connection::{ConnectionHealth, HealthCounters},
    error::MachineError,
    profile::{MachineCategory, TemperatureZone},
    state::record::{JobInfo, Position, StatusFrame, TemperatureReading},
    traits::{Connection, FileStore, HeaterControl, MachineControl, MotionControl},
    Axis, StoredFile,
};
use bytes::Bytes;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, WriteHalf},
    sync::{oneshot, Mutex},
    task::JoinHandle,
};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

/// Baud rate used when nothing better is known about a port.
pub const DEFAULT_BAUD: u32 = 115_200;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
const LONG_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

struct PendingReply {
    lines: Vec<String>,
    done: oneshot::Sender<Vec<String>>,
}

/// A duplex line-protocol client. Generic over the stream halves so tests
/// can drive it with in-memory pipes instead of hardware.
pub struct LineClient<W> {
    writer: W,
    pending: Arc<Mutex<Option<PendingReply>>>,
    read_task: JoinHandle<()>,
}

impl<W> LineClient<W>
where
    W: AsyncWrite + Send + Unpin,
{
    /// Wrap the two halves of a stream, spawning the read loop.
    pub fn new<R>(writer: W, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let pending: Arc<Mutex<Option<PendingReply>>> = Arc::new(Mutex::new(None));
        let read_task = tokio::spawn(read_loop(reader, pending.clone()));
        Self {
            writer,
            pending,
            read_task,
        }
    }

    /// Send one command line and collect its reply lines until the
    /// terminal token, or fail with a timeout after `deadline`.
    pub async fn command(
        &mut self,
        line: &str,
        deadline: Duration,
    ) -> Result<Vec<String>, MachineError> {
        let (done, reply) = oneshot::channel();
        {
            let mut slot = self.pending.lock().await;
            if slot.is_some() {
                return Err(MachineError::Connection(
                    "another command is already in flight".into(),
                ));
            }
            *slot = Some(PendingReply {
                lines: Vec::new(),
                done,
            });
        }

        if let Err(err) = self.write_line(line).await {
            self.pending.lock().await.take();
            return Err(err);
        }

        match tokio::time::timeout(deadline, reply).await {
            Ok(Ok(lines)) => Ok(lines),
            Ok(Err(_)) => Err(MachineError::Connection("serial reader stopped".into())),
            Err(_) => {
                self.pending.lock().await.take();
                Err(MachineError::Timeout { waited: deadline })
            }
        }
    }

    /// Write a line without waiting for any reply. For real-time commands
    /// and kill switches that answer late, oddly, or not at all.
    pub async fn send_raw(&mut self, line: &str) -> Result<(), MachineError> {
        self.write_line(line).await
    }

    async fn write_line(&mut self, line: &str) -> Result<(), MachineError> {
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|err| MachineError::Connection(err.to_string()))?;
        self.writer
            .write_all(b"\n")
            .await
            .map_err(|err| MachineError::Connection(err.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|err| MachineError::Connection(err.to_string()))
    }

    /// Stop the read loop and shut the stream down.
    pub async fn shutdown(self) {
        let Self {
            mut writer,
            read_task,
            ..
        } = self;
        read_task.abort();
        let _ = read_task.await;
        let _ = writer.shutdown().await;
    }
}

async fn read_loop<R>(reader: R, pending: Arc<Mutex<Option<PendingReply>>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim().to_owned();
                if line.is_empty() || line.starts_with("echo:busy") {
                    continue;
                }
                let mut slot = pending.lock().await;
                if slot.is_none() {
                    tracing::trace!(line = %line, "unsolicited serial line");
                    continue;
                }
                let terminal = is_terminal_line(&line);
                if let Some(reply) = slot.as_mut() {
                    if !(terminal && line.eq_ignore_ascii_case("ok")) {
                        reply.lines.push(line);
                    }
                }
                if terminal {
                    if let Some(reply) = slot.take() {
                        let _ = reply.done.send(reply.lines);
                    }
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "serial read failed");
                break;
            }
        }
    }
}

/// A line that ends a command's reply: the `ok` handshake (bare or with
/// payload), an error report, or a `<...>` status report.
fn is_terminal_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower == "ok"
        || lower.starts_with("ok ")
        || lower.starts_with("error")
        || (line.starts_with('<') && line.ends_with('>'))
}

/// A serial-attached machine. The poll recipe follows the category: the
/// Marlin trio for printers, the `?` report for routers and cutters.
pub struct SerialConnection {
    port: String,
    baud: u32,
    category: MachineCategory,
    suspended: bool,
    client: Option<LineClient<WriteHalf<SerialStream>>>,
    health: Arc<HealthCounters>,
}

impl SerialConnection {
    /// A closed connection to the given port.
    pub fn new(port: &str, baud: u32, category: MachineCategory) -> Self {
        Self {
            port: port.to_owned(),
            baud,
            category,
            suspended: false,
            client: None,
            health: Arc::new(HealthCounters::default()),
        }
    }

    /// The port path this connection opens.
    pub fn port(&self) -> &str {
        &self.port
    }

    async fn exec(&mut self, line: &str, deadline: Duration) -> Result<Vec<String>, MachineError> {
        let Some(client) = self.client.as_mut() else {
            return Err(MachineError::Connection("serial port is not open".into()));
        };
        match client.command(line, deadline).await {
            Ok(lines) => {
                self.health.record_success();
                Ok(lines)
            }
            Err(err) => {
                self.health.record_failure();
                Err(err)
            }
        }
    }

    async fn exec_raw(&mut self, line: &str) -> Result<(), MachineError> {
        let Some(client) = self.client.as_mut() else {
            return Err(MachineError::Connection("serial port is not open".into()));
        };
        match client.send_raw(line).await {
            Ok(()) => {
                self.health.record_success();
                Ok(())
            }
            Err(err) => {
                self.health.record_failure();
                Err(err)
            }
        }
    }

    fn is_printer(&self) -> bool {
        self.category == MachineCategory::FdmPrinter
    }

    fn unsupported(&self, op: &'static str) -> MachineError {
        MachineError::Unsupported {
            op,
            category: self.category,
        }
    }

    async fn poll_marlin(&mut self) -> Result<StatusFrame, MachineError> {
        let temp_lines = self.exec("M105", COMMAND_TIMEOUT).await?;
        let temperatures = temp_lines
            .iter()
            .find(|line| line.contains("T:") || line.contains("B:"))
            .map(|line| parse_temperature_report(line))
            .unwrap_or_default();

        let sd_lines = self.exec("M27", COMMAND_TIMEOUT).await?;
        let (mut raw_status, job) = parse_sd_status(&sd_lines);
        if raw_status == "sd printing" && self.suspended {
            raw_status = "paused".to_owned();
        }

        let position_lines = self.exec("M114", COMMAND_TIMEOUT).await?;
        let position = parse_position_report(&position_lines);

        Ok(StatusFrame {
            raw_status,
            job,
            temperatures,
            position,
            metadata: HashMap::new(),
        })
    }

    async fn poll_grbl(&mut self) -> Result<StatusFrame, MachineError> {
        let lines = self.exec("?", COMMAND_TIMEOUT).await?;
        let (raw_status, position) = lines
            .iter()
            .find_map(|line| parse_grbl_report(line))
            .ok_or_else(|| MachineError::Protocol {
                status: 0,
                message: "no status report in reply".into(),
            })?;
        Ok(StatusFrame {
            raw_status,
            position,
            ..StatusFrame::default()
        })
    }
}

impl Connection for SerialConnection {
    type Error = MachineError;

    async fn open(&mut self) -> Result<(), MachineError> {
        if self.client.is_some() {
            return Ok(());
        }
        let stream = tokio_serial::new(&self.port, self.baud)
            .open_native_async()
            .map_err(|err| MachineError::Connection(format!("{}: {err}", self.port)))?;
        let (reader, writer) = tokio::io::split(stream);
        self.client = Some(LineClient::new(writer, reader));
        self.health.reset();
        self.suspended = false;
        tracing::info!(port = %self.port, baud = self.baud, "serial port open");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), MachineError> {
        if let Some(client) = self.client.take() {
            client.shutdown().await;
            tracing::info!(port = %self.port, "serial port closed");
        }
        Ok(())
    }

    fn healthy(&self) -> bool {
        self.client.is_some() && self.health.within_failure_limit()
    }

    fn health(&self) -> ConnectionHealth {
        self.health.snapshot()
    }

    async fn send(
        &mut self,
        command: &str,
        _params: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, MachineError> {
        let lines = self.exec(command, COMMAND_TIMEOUT).await?;
        Ok(serde_json::Value::Array(
            lines.into_iter().map(serde_json::Value::String).collect(),
        ))
    }
}

impl MachineControl for SerialConnection {
    type Error = MachineError;

    async fn poll_status(&mut self) -> Result<StatusFrame, MachineError> {
        if self.is_printer() {
            self.poll_marlin().await
        } else {
            self.poll_grbl().await
        }
    }

    async fn start(&mut self, file: &str) -> Result<(), MachineError> {
        if !self.is_printer() {
            return Err(self.unsupported("start"));
        }
        self.exec(&format!("M23 {file}"), COMMAND_TIMEOUT).await?;
        self.exec("M24", COMMAND_TIMEOUT).await?;
        self.suspended = false;
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), MachineError> {
        if self.is_printer() {
            self.exec("M25", COMMAND_TIMEOUT).await?;
            self.suspended = true;
        } else {
            self.exec_raw("!").await?;
        }
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), MachineError> {
        if self.is_printer() {
            self.exec("M24", COMMAND_TIMEOUT).await?;
            self.suspended = false;
        } else {
            self.exec_raw("~").await?;
        }
        Ok(())
    }

    async fn cancel(&mut self) -> Result<(), MachineError> {
        if self.is_printer() {
            self.exec("M524", COMMAND_TIMEOUT).await?;
            self.suspended = false;
        } else {
            self.exec_raw("\u{18}").await?;
        }
        Ok(())
    }

    async fn emergency_stop(&mut self) -> Result<(), MachineError> {
        // Fire and forget: a halting controller rarely answers.
        if self.is_printer() {
            self.exec_raw("M112").await
        } else {
            self.exec_raw("\u{18}").await
        }
    }
}

impl MotionControl for SerialConnection {
    type Error = MachineError;

    async fn home(&mut self, axes: &[Axis]) -> Result<(), MachineError> {
        if self.is_printer() {
            let mut line = String::from("G28");
            for axis in axes {
                line.push(' ');
                line.push_str(&axis.to_string());
            }
            self.exec(&line, LONG_COMMAND_TIMEOUT).await?;
        } else {
            self.exec("$H", LONG_COMMAND_TIMEOUT).await?;
        }
        Ok(())
    }

    async fn jog(
        &mut self,
        axis: Axis,
        distance_mm: f64,
        feedrate_mm_min: Option<f64>,
    ) -> Result<(), MachineError> {
        if self.is_printer() {
            let feed = feedrate_mm_min.unwrap_or(600.0);
            self.exec("G91", COMMAND_TIMEOUT).await?;
            let result = self
                .exec(&format!("G0 {axis}{distance_mm} F{feed}"), COMMAND_TIMEOUT)
                .await;
            self.exec("G90", COMMAND_TIMEOUT).await?;
            result.map(|_| ())
        } else {
            let feed = feedrate_mm_min.unwrap_or(500.0);
            self.exec(
                &format!("$J=G91 {axis}{distance_mm} F{feed}"),
                COMMAND_TIMEOUT,
            )
            .await
            .map(|_| ())
        }
    }
}

impl HeaterControl for SerialConnection {
    type Error = MachineError;

    async fn set_temperature(
        &mut self,
        zone: TemperatureZone,
        celsius: f64,
    ) -> Result<(), MachineError> {
        if !self.is_printer() {
            return Err(self.unsupported("set_temperature"));
        }
        let line = match zone {
            TemperatureZone::Extruder => format!("M104 S{celsius}"),
            TemperatureZone::Bed => format!("M140 S{celsius}"),
            TemperatureZone::Chamber => format!("M141 S{celsius}"),
        };
        self.exec(&line, COMMAND_TIMEOUT).await.map(|_| ())
    }
}

impl FileStore for SerialConnection {
    type Error = MachineError;

    async fn upload_file(&mut self, path: &str, content: Bytes) -> Result<(), MachineError> {
        if !self.is_printer() {
            return Err(self.unsupported("upload_file"));
        }
        self.exec(&format!("M28 {path}"), COMMAND_TIMEOUT).await?;
        let text = String::from_utf8_lossy(&content).into_owned();
        for line in text.lines() {
            self.exec_raw(line).await?;
        }
        self.exec("M29", LONG_COMMAND_TIMEOUT).await?;
        Ok(())
    }

    async fn list_files(&mut self, _path: Option<&str>) -> Result<Vec<StoredFile>, MachineError> {
        if !self.is_printer() {
            return Err(self.unsupported("list_files"));
        }
        let lines = self.exec("M20", LONG_COMMAND_TIMEOUT).await?;
        Ok(parse_file_list(&lines))
    }

    async fn delete_file(&mut self, path: &str) -> Result<(), MachineError> {
        if !self.is_printer() {
            return Err(self.unsupported("delete_file"));
        }
        self.exec(&format!("M30 {path}"), COMMAND_TIMEOUT)
            .await
            .map(|_| ())
    }
}

/// Parse a Marlin temperature report such as
/// `ok T:210.00 /210.00 B:60.00 /60.00 @:127`. A zero target means the
/// heater is off and is reported as no target at all.
fn parse_temperature_report(line: &str) -> HashMap<String, TemperatureReading> {
    let mut readings = HashMap::new();
    let tokens: Vec<&str> = line
        .trim_start_matches("ok")
        .split_whitespace()
        .collect();

    let mut index = 0;
    while index < tokens.len() {
        let token = tokens[index];
        index += 1;
        let Some((label, value)) = token.split_once(':') else {
            continue;
        };
        let zone = match label {
            "T" | "T0" => TemperatureZone::Extruder,
            "B" => TemperatureZone::Bed,
            "C" => TemperatureZone::Chamber,
            _ => continue,
        };

        let (current_text, mut target_text) = match value.split_once('/') {
            Some((current, target)) => (current, Some(target)),
            None => (value, None),
        };
        if target_text.is_none() {
            if let Some(next) = tokens.get(index) {
                if let Some(stripped) = next.strip_prefix('/') {
                    target_text = Some(stripped);
                    index += 1;
                }
            }
        }

        let Ok(current) = current_text.parse::<f64>() else {
            continue;
        };
        let target = target_text
            .and_then(|text| text.parse::<f64>().ok())
            .filter(|target| *target > 0.0);
        readings.insert(zone.to_string(), TemperatureReading { current, target });
    }
    readings
}

/// Interpret an `M27` reply: `SD printing byte 2134/34567` or
/// `Not SD printing`.
fn parse_sd_status(lines: &[String]) -> (String, Option<JobInfo>) {
    for line in lines {
        if let Some(rest) = line.strip_prefix("SD printing byte ") {
            let progress = rest.split_once('/').and_then(|(done, total)| {
                let done = done.trim().parse::<f64>().ok()?;
                let total = total.trim().parse::<f64>().ok()?;
                (total > 0.0).then(|| (done / total) * 100.0)
            });
            let job = JobInfo {
                progress,
                ..JobInfo::default()
            };
            return ("sd printing".to_owned(), Some(job));
        }
    }
    ("idle".to_owned(), None)
}

/// Pull X/Y/Z out of an `M114` reply line such as
/// `X:12.00 Y:5.00 Z:0.30 E:110.20 Count X:960 Y:400 Z:120`.
fn parse_position_report(lines: &[String]) -> Option<Position> {
    let line = lines.iter().find(|line| line.contains("X:"))?;
    let mut position = Position::default();
    for token in line.split_whitespace() {
        if token == "Count" {
            break;
        }
        let Some((axis, value)) = token.split_once(':') else {
            continue;
        };
        let Ok(value) = value.parse::<f64>() else {
            continue;
        };
        match axis {
            "X" => position.x = Some(value),
            "Y" => position.y = Some(value),
            "Z" => position.z = Some(value),
            _ => {}
        }
    }
    (position.x.is_some() || position.y.is_some() || position.z.is_some()).then_some(position)
}

/// Parse a GRBL status report such as
/// `<Idle|MPos:1.000,2.000,3.000|FS:0,0>` into the raw state word and a
/// position when the report carries one.
fn parse_grbl_report(line: &str) -> Option<(String, Option<Position>)> {
    let body = line.strip_prefix('<')?.strip_suffix('>')?;
    let mut segments = body.split('|');
    let state = segments.next()?.trim();
    if state.is_empty() {
        return None;
    }

    let mut position = None;
    for segment in segments {
        let coords = segment
            .strip_prefix("MPos:")
            .or_else(|| segment.strip_prefix("WPos:"));
        if let Some(coords) = coords {
            let mut axes = coords.split(',').map(|value| value.trim().parse::<f64>().ok());
            position = Some(Position {
                x: axes.next().flatten(),
                y: axes.next().flatten(),
                z: axes.next().flatten(),
            });
        }
    }
    Some((state.to_lowercase(), position))
}

/// Collect entries from an `M20` reply, between the `Begin file list` and
/// `End file list` markers. Entries are `NAME.GCO [size]`.
fn parse_file_list(lines: &[String]) -> Vec<StoredFile> {
    let mut files = Vec::new();
    let mut in_list = false;
    for line in lines {
        if line.eq_ignore_ascii_case("Begin file list") {
            in_list = true;
            continue;
        }
        if line.eq_ignore_ascii_case("End file list") {
            break;
        }
        if !in_list {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(path) = parts.next() else {
            continue;
        };
        let size = parts.next().and_then(|size| size.parse::<u64>().ok());
        let name = path.rsplit('/').next().unwrap_or(path).to_owned();
        files.push(StoredFile {
            name,
            path: path.to_owned(),
            size,
            modified_at: None,
        });
    }
    files
}
