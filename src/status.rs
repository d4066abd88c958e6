// src/status.rs - Device snapshot and the derived, UI-facing session state

/// Machine state as reported by the box's status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    #[default]
    Disconnected,
    Idle,
    Buffering,
    Printing,
    Stopping,
    Unknown,
}

impl DeviceState {
    /// Map the wire string to a state. Anything unrecognized is `Unknown`
    /// rather than a parse failure; firmware revisions add states.
    pub fn from_wire(state: &str) -> Self {
        match state {
            "disconnected" => DeviceState::Disconnected,
            "idle" => DeviceState::Idle,
            "buffering" => DeviceState::Buffering,
            "printing" => DeviceState::Printing,
            "stopping" => DeviceState::Stopping,
            _ => DeviceState::Unknown,
        }
    }
}

/// The most recent status snapshot polled from the box.
///
/// Replaced wholesale on every successful poll; kept as-is (stale but valid)
/// when a poll fails. The line counts are only meaningful while the box
/// reports `printing`.
#[derive(Debug, Clone, Default)]
pub struct DeviceStatus {
    pub state: DeviceState,
    pub hotend: f64,
    pub hotend_target: f64,
    pub bed: f64,
    pub bed_target: f64,
    pub current_line: u64,
    pub total_lines: u64,
    pub buffered_lines: u64,
}

/// Coarse human-facing print stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrintPhase {
    #[default]
    NotConnected,
    Ready,
    HeatingUp,
    Printing,
    Stopping,
    Completed,
}

impl std::fmt::Display for PrintPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PrintPhase::NotConnected => "Not connected",
            PrintPhase::Ready => "Ready",
            PrintPhase::HeatingUp => "Heating up",
            PrintPhase::Printing => "Printing",
            PrintPhase::Stopping => "Stopping",
            PrintPhase::Completed => "Completed",
        };
        write!(f, "{}", name)
    }
}

/// Aggregate session state exposed to the UI collaborator.
///
/// `phase` and `progress` are derived from the latest `DeviceStatus` in
/// [`SessionState::apply_status`]; nothing else writes them while a
/// connection is up, so the UI can never observe a phase the device data
/// does not support.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub is_printing: bool,
    pub is_cancelling: bool,
    /// Progress in percent, 0-100. During heat-up this tracks the
    /// current/target temperature ratio, during printing the executed-line
    /// ratio.
    pub progress: f64,
    pub phase: PrintPhase,
    /// Set once the hotend has reached its target for the current job, so a
    /// mid-print temperature dip does not flip the phase back to heating.
    pub heated_up: bool,
}

impl SessionState {
    /// Fold a freshly polled snapshot into the session state.
    ///
    /// `reset_heated_on_idle` selects whether the heated-up latch clears on
    /// every idle transition or only when a new job starts.
    pub fn apply_status(&mut self, status: &DeviceStatus, reset_heated_on_idle: bool) {
        match status.state {
            DeviceState::Printing => {
                let heat_ratio = if status.hotend_target >= 1.0 {
                    (status.hotend / status.hotend_target) * 100.0
                } else {
                    100.0
                };
                if heat_ratio < 100.0 && !self.heated_up {
                    self.phase = PrintPhase::HeatingUp;
                    self.progress = heat_ratio.clamp(0.0, 100.0);
                } else {
                    self.heated_up = true;
                    self.phase = PrintPhase::Printing;
                    self.progress = if status.total_lines == 0 {
                        0.0
                    } else {
                        (status.current_line as f64 / status.total_lines as f64) * 100.0
                    };
                }
            }
            DeviceState::Buffering => {
                self.is_printing = true;
            }
            DeviceState::Idle => {
                // A nonzero progress means a job just finished executing;
                // one more idle cycle later the session settles back to Ready.
                self.phase = if self.progress > 0.0 {
                    PrintPhase::Completed
                } else {
                    PrintPhase::Ready
                };
                if self.phase == PrintPhase::Ready {
                    self.is_printing = false;
                }
                self.progress = 0.0;
                if reset_heated_on_idle {
                    self.heated_up = false;
                }
            }
            DeviceState::Stopping => {
                self.phase = PrintPhase::Stopping;
                self.progress = 0.0;
                self.is_printing = false;
            }
            DeviceState::Disconnected | DeviceState::Unknown => {
                self.phase = PrintPhase::NotConnected;
                self.heated_up = false;
                self.is_printing = false;
            }
        }
    }
}
