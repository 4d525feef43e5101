//! End-to-end: the host uploader against the target session over an
//! in-memory serial link.

use sfl::{
    BootParams, BoundedMachine, Error, Machine, Port, PortChannel, Region, Result, Session,
    SessionConfig, Uploader, UploaderConfig,
};
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::panic;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// One end of a full-duplex byte pipe.
struct PipePort {
    name: &'static str,
    tx: Sender<u8>,
    rx: Receiver<u8>,
    pending: VecDeque<u8>,
    timeout: Duration,
}

fn pipe() -> (PipePort, PipePort) {
    let (host_tx, target_rx) = mpsc::channel();
    let (target_tx, host_rx) = mpsc::channel();
    let end = |name, tx, rx| PipePort {
        name,
        tx,
        rx,
        pending: VecDeque::new(),
        timeout: Duration::from_millis(10),
    };
    (end("host", host_tx, host_rx), end("target", target_tx, target_rx))
}

impl Read for PipePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending.is_empty() {
            match self.rx.recv_timeout(self.timeout) {
                Ok(byte) => self.pending.push_back(byte),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(ErrorKind::TimedOut, "no data"));
                },
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(io::Error::new(ErrorKind::BrokenPipe, "peer gone"));
                },
            }
        }
        self.pending.extend(self.rx.try_iter());

        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for PipePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &byte in buf {
            self.tx
                .send(byte)
                .map_err(|_| io::Error::new(ErrorKind::BrokenPipe, "peer gone"))?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for PipePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        self.name
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct Booted {
    params: BootParams,
    address: u32,
}

/// Memory shared with the test thread; booting unwinds with [`Booted`].
#[derive(Clone, Default)]
struct SharedMachine {
    memory: Arc<Mutex<BTreeMap<u32, u8>>>,
}

impl SharedMachine {
    fn read(&self, address: u32, len: u32) -> Vec<u8> {
        let memory = self.memory.lock().unwrap();
        (address..address + len)
            .map(|a| memory.get(&a).copied().unwrap_or(0))
            .collect()
    }
}

impl Machine for SharedMachine {
    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let mut memory = self.memory.lock().unwrap();
        for (offset, &byte) in (0u32..).zip(data) {
            memory.insert(address.wrapping_add(offset), byte);
        }
        Ok(())
    }

    fn transfer_control(&mut self, params: BootParams, address: u32) -> ! {
        panic::panic_any(Booted { params, address })
    }
}

fn host_config() -> UploaderConfig {
    UploaderConfig {
        handshake_timeout: Duration::from_secs(5),
        ack_timeout: Duration::from_secs(5),
        connect_attempts: 1,
        max_retries: 3,
    }
}

fn spawn_target<M>(port: PipePort, machine: M) -> thread::JoinHandle<Result<sfl::SessionEnd>>
where
    M: Machine + Send + 'static,
{
    thread::spawn(move || {
        let channel = PortChannel::new(port)?;
        let config = SessionConfig::default().with_handshake_polls(5_000);
        Session::with_config(channel, machine, config).run()
    })
}

#[test]
fn upload_and_boot() {
    let _ = env_logger::builder().is_test(true).try_init();
    let (host_port, target_port) = pipe();
    let machine = SharedMachine::default();
    let target = spawn_target(target_port, machine.clone());

    let kernel: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
    let mut uploader = Uploader::with_config(host_port, host_config());
    uploader.connect().unwrap();
    uploader
        .load(0x4000_0000, &kernel, |_, _| {})
        .unwrap();
    uploader
        .load(0x4100_0000, b"console=ttyS0\0", |_, _| {})
        .unwrap();
    uploader.set_cmdline(0x4100_0000).unwrap();
    uploader
        .set_initrd(0x4200_0000, 0x4200_1000)
        .unwrap();
    uploader.jump(0x4000_0000).unwrap();

    let payload = target.join().unwrap_err();
    let booted = payload.downcast::<Booted>().unwrap();
    assert_eq!(booted.address, 0x4000_0000);
    assert_eq!(
        booted.params,
        BootParams {
            cmdline: 0x4100_0000,
            initrd_start: 0x4200_0000,
            initrd_end: 0x4200_1000,
        }
    );
    assert_eq!(machine.read(0x4000_0000, 1000), kernel);
    assert_eq!(machine.read(0x4100_0000, 14), b"console=ttyS0\0");
}

#[test]
fn abort_ends_session_cleanly() {
    let (host_port, target_port) = pipe();
    let machine = SharedMachine::default();
    let target = spawn_target(target_port, machine.clone());

    let mut uploader = Uploader::with_config(host_port, host_config());
    uploader.connect().unwrap();
    uploader
        .load(0x1000, &[1, 2, 3, 4, 5], |_, _| {})
        .unwrap();
    uploader.abort().unwrap();

    let end = target.join().unwrap().unwrap();
    assert_eq!(end.frames, 2);
    assert_eq!(end.bytes_loaded, 5);
    assert_eq!(machine.read(0x1000, 5), vec![1, 2, 3, 4, 5]);
}

#[test]
fn refused_write_surfaces_on_host() {
    let (host_port, target_port) = pipe();
    let machine = BoundedMachine::new(
        SharedMachine::default(),
        vec![Region::new(0x4000_0000, 0x1000)],
    );
    let target = spawn_target(target_port, machine);

    let mut uploader = Uploader::with_config(host_port, host_config());
    uploader.connect().unwrap();
    let err = uploader
        .load(0x0, &[0xFF; 16], |_, _| {})
        .unwrap_err();
    assert!(matches!(err, Error::Rejected { command: "LOAD", .. }));

    // The session survives a refused write
    uploader
        .load(0x4000_0000, &[0xFF; 16], |_, _| {})
        .unwrap();
    uploader.abort().unwrap();
    assert!(target.join().unwrap().is_ok());
}
