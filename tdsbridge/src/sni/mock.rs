//! Scripted in-memory driver for adapter tests.
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use super::{ConnRef, INSTANCE_NAME_LEN, IoDirection, OpenParams, PacketRef, SniDriver, status};

const GET_DATA_FAILED: u32 = 105;

#[derive(Clone, Copy)]
enum OpenScript {
    Succeed,
    Fail { status: u32, live_handle: bool },
}

struct MockPacket {
    dir: IoDirection,
    data: Vec<u8>,
}

#[derive(Default)]
struct State {
    next_id: usize,
    open_count: usize,
    read_count: usize,
    close_count: usize,
    release_count: usize,
    instance_name: Vec<u8>,
    packets: HashMap<usize, MockPacket>,
    writes: Vec<Vec<u8>>,
    reads: VecDeque<Vec<u8>>,
    open_script: Option<OpenScript>,
    alloc_fail: bool,
    write_status: u32,
    read_status: Option<u32>,
    sleep_on_empty: bool,
}

/// An [`SniDriver`] whose behavior is scripted per test.
///
/// Counts every close/release so the exactly-once properties are directly
/// observable.
pub(crate) struct MockSni {
    state: Mutex<State>,
}

impl MockSni {
    pub fn new() -> Arc<MockSni> {
        Arc::new(MockSni { state: Mutex::new(State::default()) })
    }

    pub fn set_instance_name(&self, name: &[u8]) {
        self.state.lock().unwrap().instance_name = name.to_vec();
    }

    pub fn fail_open(&self, status: u32) {
        self.state.lock().unwrap().open_script =
            Some(OpenScript::Fail { status, live_handle: false });
    }

    /// Fail the open but still hand back a live ref, as the native stack
    /// can after a partial connect.
    pub fn fail_open_with_live_handle(&self, status: u32) {
        self.state.lock().unwrap().open_script =
            Some(OpenScript::Fail { status, live_handle: true });
    }

    pub fn succeed_open(&self) {
        self.state.lock().unwrap().open_script = Some(OpenScript::Succeed);
    }

    pub fn fail_alloc(&self) {
        self.state.lock().unwrap().alloc_fail = true;
    }

    pub fn fail_write(&self, status: u32) {
        self.state.lock().unwrap().write_status = status;
    }

    pub fn fail_read(&self, status: u32) {
        self.state.lock().unwrap().read_status = Some(status);
    }

    /// Sleep the full wait window before reporting timeout on an empty
    /// read queue; otherwise report pending immediately.
    pub fn sleep_on_empty(&self) {
        self.state.lock().unwrap().sleep_on_empty = true;
    }

    /// Queue a payload for the next read.
    pub fn push_read(&self, data: &[u8]) {
        self.state.lock().unwrap().reads.push_back(data.to_vec());
    }

    /// Loop the most recent write back into the read queue.
    pub fn deliver_last_write(&self) {
        let mut state = self.state.lock().unwrap();
        let last = state.writes.last().cloned().expect("no write recorded");
        state.reads.push_back(last);
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().open_count
    }

    pub fn read_count(&self) -> usize {
        self.state.lock().unwrap().read_count
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().close_count
    }

    pub fn release_count(&self) -> usize {
        self.state.lock().unwrap().release_count
    }

    /// Packets allocated or produced but not yet released.
    pub fn live_packets(&self) -> usize {
        self.state.lock().unwrap().packets.len()
    }
}

impl SniDriver for MockSni {
    fn open(&self, _params: &OpenParams<'_>, instance_name: &mut [u8; INSTANCE_NAME_LEN]) -> (ConnRef, u32) {
        let mut state = self.state.lock().unwrap();
        state.open_count += 1;

        match state.open_script.unwrap_or(OpenScript::Succeed) {
            OpenScript::Fail { status, live_handle } => {
                let conn = if live_handle {
                    state.next_id += 1;
                    ConnRef(state.next_id)
                } else {
                    ConnRef::NULL
                };
                (conn, status)
            }
            OpenScript::Succeed => {
                let len = state.instance_name.len().min(INSTANCE_NAME_LEN - 1);
                instance_name[..len].copy_from_slice(&state.instance_name[..len]);
                state.next_id += 1;
                (ConnRef(state.next_id), status::SUCCESS)
            }
        }
    }

    fn close(&self, conn: ConnRef) -> u32 {
        assert!(!conn.is_null());
        self.state.lock().unwrap().close_count += 1;
        status::SUCCESS
    }

    fn packet_alloc(&self, conn: ConnRef, dir: IoDirection) -> PacketRef {
        assert!(!conn.is_null());
        let mut state = self.state.lock().unwrap();
        if state.alloc_fail {
            return PacketRef::NULL;
        }
        state.next_id += 1;
        let id = state.next_id;
        state.packets.insert(id, MockPacket { dir, data: Vec::new() });
        PacketRef(id)
    }

    fn packet_release(&self, packet: PacketRef) {
        let mut state = self.state.lock().unwrap();
        state.release_count += 1;
        assert!(state.packets.remove(&packet.0).is_some(), "packet released twice");
    }

    fn packet_set_data(&self, packet: PacketRef, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let packet = state.packets.get_mut(&packet.0).expect("unknown packet");
        assert_eq!(packet.dir, IoDirection::Write);
        packet.data = data.to_vec();
    }

    fn packet_get_data(&self, packet: PacketRef, buf: &mut [u8]) -> (u32, usize) {
        let state = self.state.lock().unwrap();
        let packet = state.packets.get(&packet.0).expect("unknown packet");
        assert_eq!(packet.dir, IoDirection::Read);
        if packet.data.len() > buf.len() {
            return (GET_DATA_FAILED, packet.data.len());
        }
        buf[..packet.data.len()].copy_from_slice(&packet.data);
        (status::SUCCESS, packet.data.len())
    }

    fn write(&self, conn: ConnRef, packet: PacketRef) -> u32 {
        assert!(!conn.is_null());
        let mut state = self.state.lock().unwrap();
        if state.write_status != status::SUCCESS {
            return state.write_status;
        }
        let data = state.packets.get(&packet.0).expect("unknown packet").data.clone();
        state.writes.push(data);
        status::SUCCESS
    }

    fn read(&self, conn: ConnRef, timeout_ms: i32) -> (u32, PacketRef) {
        assert!(!conn.is_null());
        let mut state = self.state.lock().unwrap();
        state.read_count += 1;

        if let Some(code) = state.read_status {
            return (code, PacketRef::NULL);
        }

        match state.reads.pop_front() {
            Some(data) => {
                state.next_id += 1;
                let id = state.next_id;
                state.packets.insert(id, MockPacket { dir: IoDirection::Read, data });
                (status::SUCCESS, PacketRef(id))
            }
            None if state.sleep_on_empty => {
                drop(state);
                thread::sleep(Duration::from_millis(timeout_ms.max(0) as u64));
                (status::WAIT_TIMEOUT, PacketRef::NULL)
            }
            None => (status::IO_PENDING, PacketRef::NULL),
        }
    }
}
