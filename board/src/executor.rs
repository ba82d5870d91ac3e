//! Runs a [`Board`] on a thread of its own.
//!
//! The board is single-writer: once it has been handed to a
//! [`BoardExecutor`], the only way to change it is to send a
//! [`Command`].  Commands are executed between clock edges, in the
//! order they were sent.  Everything the board has to say comes back
//! through the observer it was created with.
//!
//! While the clock runs, the executor ticks it at the configured
//! pace.  While the clock is stopped, the executor blocks on the
//! command channel until a command arrives, a device timer is due or
//! statistics need publishing.
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel as cbc;
use tracing::{event, span, Level};

use base::prelude::*;

use crate::board::Board;
use crate::config::BoardConfig;
use crate::event::ViaPort;
use crate::store::ContentStore;

/// Commands wait here while the board is busy.
const COMMAND_QUEUE_DEPTH: usize = 256;

/// The pacer gives up on catching up once it is this far behind.
const MAX_LAG: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub enum Command {
    Load(BoardConfig),
    /// Rebuild the devices from the configuration last loaded.
    ResetDevices,
    SetResetLine(WireState),
    StartClock,
    StopClock,
    SetPeriod(Duration),
    TriggerEdge(StateEdge),
    AddBreakpoint(u16),
    RemoveBreakpoint(u16),
    StepInstruction,
    StepSubroutine,
    ReceiveByte {
        device: String,
        byte: u8,
    },
    SetViaPort {
        device: String,
        port: ViaPort,
        value: u8,
    },
    LoadProgram {
        device: String,
        offset: usize,
        image: Vec<u8>,
    },
    /// Write ROM and Flash contents back to the store.
    SaveContents,
    /// Reply with the current board layout.
    Describe(cbc::Sender<BoardConfig>),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// The executor thread has gone away.
    Disconnected,
}

impl Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Disconnected => f.write_str("the board executor is no longer running"),
        }
    }
}

impl Error for CommandError {}

/// Holds the clock to its period.
///
/// Edges are scheduled against a running target instant rather than
/// by sleeping for a fixed amount after each edge, so the time spent
/// simulating the edge does not accumulate as drift.  Short waits
/// spin because the operating system cannot sleep that precisely.
#[derive(Debug)]
struct Pacer {
    active_wait_threshold: Duration,
    next_edge: Option<Instant>,
}

impl Pacer {
    fn new(active_wait_threshold: Duration) -> Pacer {
        Pacer {
            active_wait_threshold,
            next_edge: None,
        }
    }

    /// Forgets the schedule; the next wait starts a new one.
    fn reset(&mut self) {
        self.next_edge = None;
    }

    fn wait(&mut self, half_period: Duration) {
        let now = Instant::now();
        let target = match self.next_edge {
            Some(t) if now.saturating_duration_since(t) <= MAX_LAG => t + half_period,
            Some(t) => {
                event!(
                    Level::DEBUG,
                    "pacer is {:?} behind schedule, resynchronising",
                    now.saturating_duration_since(t)
                );
                now + half_period
            }
            None => now + half_period,
        };
        self.next_edge = Some(target);
        if half_period < self.active_wait_threshold {
            while Instant::now() < target {
                std::hint::spin_loop();
            }
        } else {
            let remaining = target.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                thread::sleep(remaining);
            }
        }
    }
}

pub struct BoardExecutor {
    sender: cbc::Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for BoardExecutor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoardExecutor")
            .field("running", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

impl BoardExecutor {
    /// Moves `board` onto a new thread.
    ///
    /// # Errors
    ///
    /// The thread could not be created.
    pub fn spawn(
        board: Board,
        store: Box<dyn ContentStore + Send>,
    ) -> Result<BoardExecutor, std::io::Error> {
        let (sender, receiver) = cbc::bounded(COMMAND_QUEUE_DEPTH);
        let handle = thread::Builder::new()
            .name("board".to_string())
            .spawn(move || run(board, store, &receiver))?;
        Ok(BoardExecutor {
            sender,
            handle: Some(handle),
        })
    }

    /// Queues a command.  Blocks while the queue is full.
    ///
    /// # Errors
    ///
    /// The executor has shut down.
    pub fn send(&self, command: Command) -> Result<(), CommandError> {
        self.sender
            .send(command)
            .map_err(|_| CommandError::Disconnected)
    }

    /// Stops the executor thread and waits for it to finish.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            // If the thread already exited, there is nobody to tell.
            let _ = self.sender.send(Command::Shutdown);
            if handle.join().is_err() {
                event!(Level::ERROR, "board executor thread panicked");
            }
        }
    }
}

impl Drop for BoardExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// How long the idle executor may block before it has something to
/// do by itself.
fn idle_timeout(board: &Board, now: Duration, next_stats: Duration) -> Duration {
    let wake = match board.next_deadline() {
        Some(deadline) => deadline.min(next_stats),
        None => next_stats,
    };
    wake.saturating_sub(now)
}

fn next_command(
    receiver: &cbc::Receiver<Command>,
    timeout: Duration,
) -> Result<Option<Command>, cbc::RecvTimeoutError> {
    if timeout.is_zero() {
        match receiver.try_recv() {
            Ok(command) => Ok(Some(command)),
            Err(cbc::TryRecvError::Empty) => Ok(None),
            Err(cbc::TryRecvError::Disconnected) => Err(cbc::RecvTimeoutError::Disconnected),
        }
    } else {
        match receiver.recv_timeout(timeout) {
            Ok(command) => Ok(Some(command)),
            Err(cbc::RecvTimeoutError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn run(
    mut board: Board,
    mut store: Box<dyn ContentStore + Send>,
    receiver: &cbc::Receiver<Command>,
) {
    let span = span!(Level::INFO, "board executor");
    let _enter = span.enter();

    let origin = Instant::now();
    let stats_interval = board.settings().stats_interval;
    let mut pacer = Pacer::new(board.settings().active_wait_threshold);
    let mut next_stats = stats_interval;
    let mut last_stats = Duration::ZERO;

    loop {
        let now = origin.elapsed();
        board.set_time(now);
        let timeout = if board.clock().is_running() {
            Duration::ZERO
        } else {
            idle_timeout(&board, now, next_stats)
        };
        match next_command(receiver, timeout) {
            Ok(Some(Command::Shutdown)) => break,
            Ok(Some(command)) => {
                board.set_time(origin.elapsed());
                execute(&mut board, store.as_mut(), command);
                continue;
            }
            Ok(None) => (),
            Err(_) => {
                event!(Level::INFO, "all command senders have gone away");
                break;
            }
        }

        let now = origin.elapsed();
        board.set_time(now);
        board.poll_devices();
        if now >= next_stats {
            board.collect_stats(now - last_stats);
            last_stats = now;
            next_stats = now + stats_interval;
        }

        if board.clock().is_running() {
            board.tick();
            pacer.wait(board.clock().half_period());
        } else {
            pacer.reset();
        }
    }
    event!(Level::INFO, "board executor stopped");
}

fn execute(board: &mut Board, store: &mut dyn ContentStore, command: Command) {
    event!(Level::DEBUG, "executing {:?}", command);
    let outcome = match command {
        Command::Load(config) => board.load(&config, store).map_err(|e| e.to_string()),
        Command::ResetDevices => board.reset_devices(store).map_err(|e| e.to_string()),
        Command::SetResetLine(state) => {
            board.set_reset_line(state);
            Ok(())
        }
        Command::StartClock => {
            board.start_clock();
            Ok(())
        }
        Command::StopClock => {
            board.stop_clock();
            Ok(())
        }
        Command::SetPeriod(period) => {
            board.set_period(period);
            Ok(())
        }
        Command::TriggerEdge(edge) => {
            board.trigger_edge(edge);
            Ok(())
        }
        Command::AddBreakpoint(address) => {
            board.add_breakpoint(address);
            Ok(())
        }
        Command::RemoveBreakpoint(address) => {
            board.remove_breakpoint(address);
            Ok(())
        }
        Command::StepInstruction => {
            board.step_instruction();
            Ok(())
        }
        Command::StepSubroutine => {
            board.step_subroutine();
            Ok(())
        }
        Command::ReceiveByte { device, byte } => board
            .receive_serial_byte(&device, byte)
            .map_err(|e| e.to_string()),
        Command::SetViaPort {
            device,
            port,
            value,
        } => board
            .set_via_port(&device, port, value)
            .map_err(|e| e.to_string()),
        Command::LoadProgram {
            device,
            offset,
            image,
        } => board
            .load_program(&device, offset, &image)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        Command::SaveContents => {
            board.save_contents(store);
            Ok(())
        }
        Command::Describe(reply) => reply
            .send(board.to_config())
            .map_err(|_| "nobody is waiting for the board description".to_string()),
        Command::Shutdown => Ok(()),
    };
    if let Err(msg) = outcome {
        event!(Level::WARN, "command failed: {}", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeviceConfig, DeviceType, SimulationConfig};
    use crate::cpu::testing::{fetch, ScriptedCore};
    use crate::devices::MemoryKind;
    use crate::event::BoardEvent;
    use crate::store::InMemoryStore;

    const NOP: u8 = 0xEA;
    const PATIENCE: Duration = Duration::from_secs(10);

    fn config() -> BoardConfig {
        let mut rom = DeviceConfig::new(DeviceType::Memory, "ROM", Some(0x8000));
        rom.memory_type = Some(MemoryKind::Rom);
        rom.memory_size = Some(0x100);
        BoardConfig {
            busses: Vec::new(),
            devices: vec![
                rom,
                DeviceConfig::new(DeviceType::Acia, "ACIA", Some(0x5000)),
            ],
        }
    }

    fn spawn(script: Vec<crate::cpu::CpuPins>) -> (BoardExecutor, cbc::Receiver<BoardEvent>) {
        let (tx, rx) = cbc::unbounded();
        let settings = SimulationConfig {
            clock_period: Duration::from_micros(20),
            stats_interval: Duration::from_millis(20),
            ..SimulationConfig::default()
        };
        let board = Board::new(Box::new(ScriptedCore::new(script)), settings, Box::new(tx));
        let executor =
            BoardExecutor::spawn(board, Box::new(InMemoryStore::new())).expect("spawn executor");
        (executor, rx)
    }

    fn wait_for(rx: &cbc::Receiver<BoardEvent>, wanted: &BoardEvent) {
        let give_up = Instant::now() + PATIENCE;
        loop {
            let left = give_up.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left) {
                Ok(ev) if ev == *wanted => return,
                Ok(_) => (),
                Err(e) => panic!("gave up waiting for {wanted:?}: {e}"),
            }
        }
    }

    #[test]
    fn load_and_describe() {
        let (executor, rx) = spawn(Vec::new());
        executor.send(Command::Load(config())).expect("send");
        wait_for(&rx, &BoardEvent::LoadFinished(true));
        let (reply_tx, reply_rx) = cbc::bounded(1);
        executor.send(Command::Describe(reply_tx)).expect("send");
        assert_eq!(reply_rx.recv_timeout(PATIENCE), Ok(config()));
    }

    #[test]
    fn clock_runs_until_breakpoint() {
        let script = (0x8000..0x8010).map(fetch).collect();
        let (executor, rx) = spawn(script);
        executor.send(Command::Load(config())).expect("send");
        executor
            .send(Command::LoadProgram {
                device: "ROM".to_string(),
                offset: 0,
                image: vec![NOP; 16],
            })
            .expect("send");
        executor.send(Command::AddBreakpoint(0x8008)).expect("send");
        executor.send(Command::StartClock).expect("send");
        wait_for(&rx, &BoardEvent::ClockRunningChanged(true));
        wait_for(
            &rx,
            &BoardEvent::NewInstruction {
                address: 0x8008,
                opcode: NOP,
            },
        );
        wait_for(&rx, &BoardEvent::ClockRunningChanged(false));
    }

    #[test]
    fn serial_input_completes_while_the_clock_is_stopped() {
        let (executor, rx) = spawn(Vec::new());
        executor.send(Command::Load(config())).expect("send");
        executor
            .send(Command::ReceiveByte {
                device: "ACIA".to_string(),
                byte: b'A',
            })
            .expect("send");
        wait_for(
            &rx,
            &BoardEvent::AciaReceivingChanged {
                device: "ACIA".to_string(),
                receiving: false,
            },
        );
    }

    #[test]
    fn statistics_are_published() {
        let (executor, rx) = spawn(Vec::new());
        executor.send(Command::StartClock).expect("send");
        let give_up = Instant::now() + PATIENCE;
        loop {
            let left = give_up.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left) {
                Ok(BoardEvent::ClockStats { cycles_per_second }) if cycles_per_second > 0 => break,
                Ok(_) => (),
                Err(e) => panic!("no statistics: {e}"),
            }
        }
        drop(executor);
    }

    #[test]
    fn send_fails_after_shutdown() {
        let (mut executor, _rx) = spawn(Vec::new());
        executor.shutdown();
        assert_eq!(
            executor.send(Command::StartClock),
            Err(CommandError::Disconnected)
        );
    }

    #[test]
    fn pacer_holds_the_period() {
        let mut pacer = Pacer::new(Duration::from_millis(1));
        let start = Instant::now();
        for _ in 0..4 {
            pacer.wait(Duration::from_micros(250));
        }
        assert!(start.elapsed() >= Duration::from_millis(1));

        let start = Instant::now();
        pacer.reset();
        pacer.wait(Duration::from_millis(2));
        assert!(start.elapsed() >= Duration::from_millis(2));
    }
}
