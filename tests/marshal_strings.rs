//! String marshalling: owned, length-prefixed buffers in both directions.

use std::sync::atomic::{AtomicU64, Ordering};

use interop_rs::marshal::{Marshal, MarshalKind, NativeArg, Value};
use interop_rs::{
    com_class, com_iid, com_interface, hresults, BStr, BStrRef, ComPtr, HResult, IBase,
    IBaseTrait, MarshalError,
};

com_iid!(
    IID_IREVERSER = [
        0xd4a7_2c31,
        0x18be,
        0x4f02,
        [0xb0, 0x66, 0x5c, 0x4d, 0xee, 0x01, 0x9a, 0x72]
    ]
);

com_interface! {
    interface (IReverser, IReverserTrait): (IBase, IBaseTrait) {
        iid: IID_IREVERSER,
        vtable: IReverserVtbl,

        fn reverse(input: &BStr, output: &mut BStrRef) -> HResult;
        fn last_length() -> u64;
    }
}

com_class! {
    class Reverser {
        iface_reverser: IReverser;
        @data: ReverserState;
    }
}

#[derive(Default)]
struct ReverserState {
    last_length: AtomicU64,
}

impl IReverserTrait for Reverser {
    fn reverse(&self, input: &BStr, output: &mut BStrRef) -> HResult {
        let Ok(text) = input.to_str() else {
            return hresults::E_MARSHAL;
        };
        self.data
            .last_length
            .store(input.len() as u64, Ordering::Relaxed);
        let reversed: String = text.chars().rev().collect();
        *output = BStrRef::new(&reversed);
        hresults::E_OK
    }

    fn last_length(&self) -> u64 {
        self.data.last_length.load(Ordering::Relaxed)
    }
}

fn new_reverser() -> ComPtr<IReverser> {
    Reverser::alloc(ReverserState::default()).query().unwrap()
}

#[test]
fn bytes_round_trip_exactly() {
    let cases: &[&str] = &[
        "",
        "plain ascii",
        "zero\0inside\0twice",
        "多字节字符串",
        "mixed: ż\0ółć",
    ];
    for case in cases {
        let buffer = BStrRef::new(case);
        assert_eq!(buffer.data(), case.as_bytes());
        assert_eq!(buffer.len(), case.len(), "length must be the byte count");
        assert_eq!(buffer.to_str().unwrap(), *case);
    }
}

#[test]
fn marshaller_round_trip_preserves_content() {
    let kind = MarshalKind::text();
    for case in ["", "hello\0world", "πλάτων"] {
        let lowered = kind.lower(&Value::Str(case.into())).unwrap();
        let lifted = kind.lift(lowered, true).unwrap();
        match lifted {
            Value::Str(s) => assert_eq!(s, case),
            other => panic!("unexpected value {other:?}"),
        }
    }
}

#[test]
fn malformed_buffer_is_a_marshal_failure() {
    let raw = BStr::alloc_bytes(b"\xff\xfe\x00broken");
    let kind = MarshalKind::text();
    let result = kind.lift(NativeArg::Ptr(raw as *mut _), true);
    assert!(matches!(result, Err(MarshalError::InvalidUtf8)));
}

#[test]
fn strings_cross_the_call_table() {
    let reverser = new_reverser();

    let input = BStrRef::new("γράμμα");
    let mut output = BStrRef::null();
    reverser.reverse(&input, &mut output).into_result().unwrap();

    let expected: String = "γράμμα".chars().rev().collect();
    assert_eq!(output.to_str().unwrap(), expected);

    // The native-side length accessor reports bytes, not characters and not
    // a terminator-derived count.
    assert_eq!(reverser.last_length(), "γράμμα".len() as u64);
}

#[test]
fn embedded_zero_bytes_cross_intact() {
    let reverser = new_reverser();

    let input = BStrRef::new("a\0b");
    let mut output = BStrRef::null();
    reverser.reverse(&input, &mut output).into_result().unwrap();

    assert_eq!(output.data(), "b\0a".as_bytes());
    assert_eq!(reverser.last_length(), 3);
}
