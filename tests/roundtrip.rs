//! Crossing the boundary in both directions: stubs for managed objects,
//! proxies for native pointers, and the round-trip short-circuit that keeps
//! wrapper chains from growing.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use interop_rs::{
    ccw_for_object, com_iid, com_interface, stub, ComPtr, IBase, IBaseTrait,
};

com_iid!(
    IID_ITICKET = [
        0x9c1f_0e52,
        0x7a3d,
        0x4b88,
        [0x84, 0x5e, 0x21, 0x6f, 0x30, 0x9b, 0xc4, 0x17]
    ]
);

com_interface! {
    interface (ITicket, ITicketTrait): (IBase, IBaseTrait) {
        iid: IID_ITICKET,
        vtable: ITicketVtbl,

        fn punch() -> u32;
    }
}

/// Serializes the tests that watch the process-wide stub counters.
static COUNTER_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// A plain managed object with no native identity of its own.
struct Ticket {
    punches: AtomicU32,
    dropped: Arc<AtomicBool>,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

// The base contract defaults describe exactly this case.
impl IBaseTrait for Ticket {}

impl ITicketTrait for Ticket {
    fn punch(&self) -> u32 {
        self.punches.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[test]
fn null_crosses_as_null() {
    let none: ComPtr<ITicket> = ccw_for_object::<ITicket>(None);
    assert!(none.is_null());

    let null_proxy = unsafe { interop_rs::rcw_from_ptr::<ITicket>(std::ptr::null_mut(), true) };
    assert!(null_proxy.is_null());
}

#[test]
fn stub_forwards_and_roots_the_object() {
    let _serial = COUNTER_LOCK.lock().unwrap();
    let dropped = Arc::new(AtomicBool::new(false));
    let managed: Arc<dyn ITicketTrait> = Arc::new(Ticket {
        punches: AtomicU32::new(0),
        dropped: dropped.clone(),
    });

    let before = stub::stubs_created();
    let native = ccw_for_object::<ITicket>(Some(&managed));
    assert_eq!(stub::stubs_created(), before + 1);
    assert!(!native.is_null());

    // Calls travel through the thunk table into the managed object.
    assert_eq!(native.punch(), 1);
    assert_eq!(native.punch(), 2);

    // The stub holds its own root: dropping the caller's Arc is not enough
    // to collect the object.
    drop(managed);
    assert!(!dropped.load(Ordering::SeqCst));
    assert_eq!(native.punch(), 3);

    // The last release drops the rooting reference.
    drop(native);
    assert!(dropped.load(Ordering::SeqCst));
}

#[test]
fn round_trip_reuses_the_original_pointer() {
    let _serial = COUNTER_LOCK.lock().unwrap();
    let managed: Arc<dyn ITicketTrait> = Arc::new(Ticket {
        punches: AtomicU32::new(0),
        dropped: Arc::new(AtomicBool::new(false)),
    });
    let native = ccw_for_object::<ITicket>(Some(&managed));

    // Cross back in: the proxy is a managed implementation of the trait.
    let crossed_in: Arc<dyn ITicketTrait> = Arc::new(native.clone());

    // And cross out again: same call table, no new stub.
    let stubs_before = stub::stubs_created();
    let crossed_out = ccw_for_object::<ITicket>(Some(&crossed_in));
    assert_eq!(crossed_out.as_raw(), native.as_raw());
    assert_eq!(stub::stubs_created(), stubs_before);

    // Repeated round trips stay flat.
    for _ in 0..16 {
        let again: Arc<dyn ITicketTrait> = Arc::new(crossed_out.clone());
        let out = ccw_for_object::<ITicket>(Some(&again));
        assert_eq!(out.as_raw(), native.as_raw());
    }
    assert_eq!(stub::stubs_created(), stubs_before);
}

#[test]
fn stub_query_interface_answers_self_and_rejects_strangers() {
    com_iid!(
        IID_ISTRANGER = [
            0x9c1f_0e53,
            0x7a3d,
            0x4b88,
            [0x84, 0x5e, 0x21, 0x6f, 0x30, 0x9b, 0xc4, 0x18]
        ]
    );
    com_interface! {
        interface (IStranger, IStrangerTrait): (IBase, IBaseTrait) {
            iid: IID_ISTRANGER,
            vtable: IStrangerVtbl,
        }
    }

    let _serial = COUNTER_LOCK.lock().unwrap();
    let managed: Arc<dyn ITicketTrait> = Arc::new(Ticket {
        punches: AtomicU32::new(0),
        dropped: Arc::new(AtomicBool::new(false)),
    });
    let native = ccw_for_object::<ITicket>(Some(&managed));

    // Through the base handle the lookup goes through the stub's own
    // query_interface slot, not the in-process fast path.
    let base: ComPtr<IBase> = native.query().unwrap();
    let again: ComPtr<ITicket> = base.query().unwrap();
    assert_eq!(again.as_raw(), native.as_raw());

    let absent = base.query_or_null::<IStranger>().unwrap();
    assert!(absent.is_none());
}

#[test]
fn independent_handles_do_not_share_units() {
    let _serial = COUNTER_LOCK.lock().unwrap();
    let managed: Arc<dyn ITicketTrait> = Arc::new(Ticket {
        punches: AtomicU32::new(0),
        dropped: Arc::new(AtomicBool::new(false)),
    });
    let a = ccw_for_object::<ITicket>(Some(&managed));
    let b = a.clone();

    // Disposing one handle must not invalidate the other.
    a.dispose();
    assert!(a.is_null());
    assert_eq!(b.punch(), 1);
}
