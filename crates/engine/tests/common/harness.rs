use ttasim_core::Simulator;
use ttasim_core::common::SimValue;
use ttasim_core::config::{Backend, Config};
use ttasim_core::model::{Machine, Program};
use ttasim_core::sim::SimulationController;
use std::io;
use std::sync::{Arc, Mutex};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::MakeWriter;

use super::builder::machine::MachineBuilder;

/// Installs a test-writer subscriber once; later calls are no-ops.
///
/// Set `RUST_LOG=ttasim_core=debug` to see the simulator's log output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// In-memory sink for formatted log lines.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Runs `f` with a debug-level subscriber and returns everything it logged.
pub fn capture_logs(f: impl FnOnce()) -> String {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(buffer.clone())
        .finish();
    tracing::subscriber::with_default(subscriber, f);
    let bytes = buffer.0.lock().unwrap().clone();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// A simulation session with a machine and program loaded.
pub struct TestContext {
    pub sim: Simulator,
}

impl TestContext {
    /// Loads `program` on the standard machine with the default configuration.
    pub fn new(program: &Program) -> Self {
        Self::with_machine(&MachineBuilder::standard().build(), program, Config::default())
    }

    /// Loads `program` on the standard machine using `backend`.
    pub fn with_backend(program: &Program, backend: Backend) -> Self {
        let mut config = Config::default();
        config.simulation.backend = backend;
        Self::with_machine(&MachineBuilder::standard().build(), program, config)
    }

    pub fn with_machine(machine: &Machine, program: &Program, config: Config) -> Self {
        init_tracing();
        let mut sim = Simulator::new(config);
        sim.load(machine, program)
            .expect("test machine and program should load");
        Self { sim }
    }

    /// Convenience accessor for the controller.
    pub fn controller(&self) -> &SimulationController {
        self.sim.controller().expect("program is loaded")
    }

    /// Mutable convenience accessor for the controller.
    pub fn controller_mut(&mut self) -> &mut SimulationController {
        self.sim.controller_mut().expect("program is loaded")
    }

    /// Reads a register of the standard register file.
    pub fn reg(&self, index: usize) -> u64 {
        self.controller()
            .register_value("RF", index)
            .map(SimValue::unsigned)
            .expect("register exists")
    }

    pub fn run(&mut self) {
        self.sim.run().expect("run should not fail");
    }

    pub fn step(&mut self, count: u64) {
        self.sim.step(count).expect("step should not fail");
    }
}
