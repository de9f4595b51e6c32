//! Interface attribute passing and object lifetime through the call table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use interop_rs::{
    com_class, com_iid, com_interface, hresults, ComPtr, ComRef, HResult, IBase, IBaseTrait,
};

com_iid!(
    IID_IHOLDER = [
        0x35ed_ff15,
        0x0b38,
        0x47d8,
        [0x9b, 0x7c, 0xe0, 0x0f, 0xa2, 0xac, 0xdf, 0x9d]
    ]
);

com_interface! {
    interface (IHolder, IHolderTrait): (IBase, IBaseTrait) {
        iid: IID_IHOLDER,
        vtable: IHolderVtbl,

        fn get_item(retval: &mut ComPtr<IHolder>) -> HResult;
        fn set_item(value: ComRef<'_, IHolder>) -> HResult;
    }
}

com_class! {
    class Holder {
        iface_holder: IHolder;
        @data: HolderData;
    }
}

struct HolderData {
    item: Mutex<ComPtr<IHolder>>,
    alive: Arc<AtomicBool>,
}

impl HolderData {
    fn new(alive: Arc<AtomicBool>) -> Self {
        alive.store(true, Ordering::SeqCst);
        Self {
            item: Mutex::new(ComPtr::null()),
            alive,
        }
    }
}

impl Drop for HolderData {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl IHolderTrait for Holder {
    fn get_item(&self, retval: &mut ComPtr<IHolder>) -> HResult {
        *retval = self.data.item.lock().clone();
        hresults::E_OK
    }

    fn set_item(&self, value: ComRef<'_, IHolder>) -> HResult {
        *self.data.item.lock() = value.to_owned();
        hresults::E_OK
    }
}

fn new_holder(alive: &Arc<AtomicBool>) -> ComPtr<IHolder> {
    Holder::alloc(HolderData::new(alive.clone()))
        .query()
        .unwrap()
}

#[test]
fn create_and_destroy() {
    let alive = Arc::new(AtomicBool::new(false));
    {
        let inst = new_holder(&alive);
        assert!(!inst.is_null());
        assert!(alive.load(Ordering::SeqCst));
    }
    assert!(!alive.load(Ordering::SeqCst), "instance outlived its handles");
}

#[test]
fn attribute_round_trip() {
    let alive = Arc::new(AtomicBool::new(false));
    {
        let inst = new_holder(&alive);
        let mut ret = ComPtr::null();

        inst.get_item(&mut ret).into_result().unwrap();
        assert!(ret.is_null());

        inst.set_item(ComRef::from_com_ptr(&inst)).into_result().unwrap();
        inst.get_item(&mut ret).into_result().unwrap();
        assert!(!ret.is_null());
        assert_eq!(ret.as_raw(), inst.as_raw());

        inst.set_item(ComRef::null()).into_result().unwrap();
        inst.get_item(&mut ret).into_result().unwrap();
        assert!(ret.is_null());
    }
    assert!(!alive.load(Ordering::SeqCst));
}

#[test]
fn self_reference_cycle_leaks() {
    let alive = Arc::new(AtomicBool::new(false));
    {
        let inst = new_holder(&alive);
        inst.set_item(ComRef::from_com_ptr(&inst)).into_result().unwrap();
        // the instance now holds a unit on itself
    }
    assert!(
        alive.load(Ordering::SeqCst),
        "a reference cycle is expected to keep the object alive"
    );
}

#[test]
fn wrapping_a_transferred_unit_is_balanced() {
    let alive = Arc::new(AtomicBool::new(false));
    let inst = new_holder(&alive);

    let probe = |p: &ComPtr<IHolder>| {
        let n = IBaseTrait::retain(p);
        unsafe { IBaseTrait::release(p) };
        n
    };
    let before = probe(&inst);

    // Transfer one freshly taken unit into a proxy, then dispose it.
    let raw = inst.as_raw();
    IBaseTrait::retain(&inst);
    let wrapped = unsafe { interop_rs::rcw_from_ptr(raw, true) };
    wrapped.dispose();
    drop(wrapped);

    assert_eq!(probe(&inst), before, "wrap plus dispose moved the count");
}

#[test]
fn disposal_racing_drop_releases_once() {
    let alive = Arc::new(AtomicBool::new(false));
    let inst = new_holder(&alive);

    let probe = |p: &ComPtr<IHolder>| {
        let n = IBaseTrait::retain(p);
        unsafe { IBaseTrait::release(p) };
        n
    };
    let before = probe(&inst);

    let extra = inst.clone();
    extra.dispose();
    extra.dispose(); // second disposal is a no-op
    drop(extra); // and so is the drop that follows

    assert_eq!(probe(&inst), before);
}

#[test]
fn query_interface_for_base_returns_same_object() {
    let alive = Arc::new(AtomicBool::new(false));
    let inst = new_holder(&alive);

    let base: ComPtr<IBase> = inst.query().unwrap();
    assert!(!base.is_null());
    // the holder's first slot serves both identifiers
    assert_eq!(base.as_raw() as usize, inst.as_raw() as usize);
}
