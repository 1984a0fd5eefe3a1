#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use evocode::format::FormatTag;
use evocode::{Decimal, Evocode, EvocodeError, EvocodeOptions, Evolve, FractionalNumber, SchemaKind};
use uuid::Uuid;

#[derive(Debug, Default, Clone, PartialEq, Evolve)]
struct Profile {
    #[evolve(id = 1)]
    name: String,
    #[evolve(id = 2)]
    age: Option<u8>,
    #[evolve(id = 3)]
    tags: Vec<String>,
    #[evolve(id = 4)]
    scores: BTreeMap<String, f64>,
    #[evolve(id = 5)]
    id: Uuid,
    #[evolve(id = 6)]
    balance: Decimal,
}

fn create_profile() -> Profile {
    let mut scores = BTreeMap::new();
    scores.insert("chess".to_string(), 1450.5);
    scores.insert("go".to_string(), -3.25);
    Profile {
        name: "Ada".to_string(),
        age: Some(36),
        tags: vec!["admin".to_string(), "ops".to_string()],
        scores,
        id: Uuid::from_u128(0x0123_4567_89ab_cdef_0123_4567_89ab_cdef),
        balance: Decimal::new(-123_456, 2).unwrap(),
    }
}

fn codec() -> Evocode {
    Evocode::builder().register::<Profile>().build().unwrap()
}

// --- TESTS ---

/// Records, options, collections and natives survive a round trip.
#[test]
fn test_record_round_trip() -> evocode::Result<()> {
    let codec = codec();
    let profile = create_profile();

    let bytes = codec.serialize(&profile)?;
    let loaded: Profile = codec.deserialize(&bytes)?;
    assert_eq!(loaded, profile);

    let anonymous = Profile { age: None, ..Profile::default() };
    let loaded: Profile = codec.deserialize(&codec.serialize(&anonymous)?)?;
    assert_eq!(loaded, anonymous);
    Ok(())
}

#[test]
fn test_native_round_trips() -> evocode::Result<()> {
    let codec = Evocode::builder().build()?;

    macro_rules! round_trip {
        ($($value:expr => $t:ty),* $(,)?) => {
            $(
                let value: $t = $value;
                let bytes = codec.serialize(&value)?;
                assert_eq!(codec.deserialize::<$t>(&bytes)?, value, "round trip of {}", stringify!($t));
            )*
        };
    }

    round_trip! {
        true => bool,
        200 => u8,
        -100 => i8,
        -30_000 => i16,
        60_000 => u16,
        i32::MIN => i32,
        u32::MAX => u32,
        i64::MIN => i64,
        u64::MAX => u64,
        1.5 => f32,
        -2.75e300 => f64,
        'λ' => char,
        "héllo".to_string() => String,
        usize::MAX => usize,
        isize::MIN => isize,
        FractionalNumber(42.0) => FractionalNumber,
        FractionalNumber(0.1) => FractionalNumber,
        Decimal::new(314_159, 5)? => Decimal,
        Uuid::from_u128(7) => Uuid,
        () => (),
    }
    Ok(())
}

#[test]
fn test_collection_round_trips() -> evocode::Result<()> {
    let codec = Evocode::builder().build()?;

    let deque: VecDeque<i16> = (0..10).collect();
    assert_eq!(codec.deserialize::<VecDeque<i16>>(&codec.serialize(&deque)?)?, deque);

    let set: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
    assert_eq!(codec.deserialize::<HashSet<String>>(&codec.serialize(&set)?)?, set);

    let tree: BTreeSet<u64> = [3, 1, 2].into_iter().collect();
    assert_eq!(codec.deserialize::<BTreeSet<u64>>(&codec.serialize(&tree)?)?, tree);

    let boxed: Box<[u8]> = vec![1, 2, 3].into_boxed_slice();
    assert_eq!(codec.deserialize::<Box<[u8]>>(&codec.serialize(&boxed)?)?, boxed);

    let shared: Arc<[i32]> = Arc::from(vec![4, 5]);
    assert_eq!(codec.deserialize::<Arc<[i32]>>(&codec.serialize(&shared)?)?, shared);

    let nested: Vec<Option<Vec<i32>>> = vec![Some(vec![1]), None, Some(vec![])];
    assert_eq!(codec.deserialize::<Vec<Option<Vec<i32>>>>(&codec.serialize(&nested)?)?, nested);

    let triple = (1u8, "two".to_string(), 3.0f64);
    assert_eq!(codec.deserialize::<(u8, String, f64)>(&codec.serialize(&triple)?)?, triple);
    Ok(())
}

/// Bare integers use a one-byte header; everything else carries its schema.
#[test]
fn test_header_selection() -> evocode::Result<()> {
    let codec = codec();

    assert_eq!(codec.serialize(&7i32)?, vec![FormatTag::Int.as_u8(), 7, 0, 0, 0]);
    assert_eq!(codec.serialize(&7u8)?, vec![FormatTag::Byte.as_u8(), 7]);

    let header = codec.read_header(&codec.serialize(&Some(7i32))?)?;
    assert_eq!(header.tag, FormatTag::NoBlockId);
    assert_eq!(header.schema.kind(), SchemaKind::Int);
    assert!(header.schema.is_nullable());

    let header = codec.read_header(&codec.serialize(&"text".to_string())?)?;
    assert_eq!(header.tag, FormatTag::NoBlockId);
    assert_eq!(header.block, None);

    let header = codec.read_header(&codec.serialize(&create_profile())?)?;
    assert_eq!(header.tag, FormatTag::Full);
    assert_eq!(header.block, codec.latest_block());
    assert_eq!(header.schema.contents_id(), codec.contents_id_of::<Profile>()?);

    let plain = Evocode::builder().raw_integer_headers(false).build()?;
    let bytes = plain.serialize(&7i32)?;
    assert_eq!(bytes[0], FormatTag::NoBlockId.as_u8());
    assert_eq!(plain.deserialize::<i32>(&bytes)?, 7);
    Ok(())
}

#[test]
fn test_serialize_into_appends() -> evocode::Result<()> {
    let codec = codec();
    let mut buf = vec![0xAA];
    codec.serialize_into(&5u8, &mut buf)?;
    assert_eq!(buf, vec![0xAA, FormatTag::Byte.as_u8(), 5]);
    Ok(())
}

#[test]
fn test_deserialize_with_schema() -> evocode::Result<()> {
    let codec = codec();
    let bytes = codec.serialize(&create_profile())?;
    let header = codec.read_header(&bytes)?;

    let body = &bytes[header.len..];
    let loaded: Profile = codec.deserialize_with_schema(&header.schema, body)?;
    assert_eq!(loaded, create_profile());

    let skipper = codec.skipper(&header.schema)?;
    let mut input = evocode::codec::Input::new(body);
    skipper.skip(&mut input)?;
    assert!(input.is_exhausted());
    Ok(())
}

#[test]
fn test_trailing_bytes() -> evocode::Result<()> {
    let mut bytes = codec().serialize(&1u16)?;
    bytes.push(0);

    let strict = codec();
    assert!(matches!(
        strict.deserialize::<u16>(&bytes),
        Err(EvocodeError::Deserialization(_))
    ));

    let lenient = Evocode::builder().reject_trailing_bytes(false).build()?;
    assert_eq!(lenient.deserialize::<u16>(&bytes)?, 1);
    Ok(())
}

#[test]
fn test_malformed_input() -> evocode::Result<()> {
    let codec = codec();

    assert!(matches!(codec.deserialize::<u32>(&[]), Err(EvocodeError::Deserialization(_))));
    assert!(matches!(codec.deserialize::<u32>(&[0x07]), Err(EvocodeError::Deserialization(_))));
    // Truncated raw body.
    assert!(matches!(
        codec.deserialize::<u32>(&[FormatTag::UInt.as_u8(), 1, 2]),
        Err(EvocodeError::Deserialization(_))
    ));

    let bytes = codec.serialize(&create_profile())?;
    for cut in 0..bytes.len() {
        assert!(codec.deserialize::<Profile>(&bytes[..cut]).is_err(), "prefix of {cut} bytes");
    }
    Ok(())
}

#[test]
fn test_nested_nullability_is_rejected() {
    let codec = codec();
    assert!(matches!(
        codec.serialize(&Some(Some(1i32))),
        Err(EvocodeError::Schema(_))
    ));
    assert!(matches!(codec.schema_of::<Option<Option<i32>>>(), Err(EvocodeError::Schema(_))));
}

#[test]
fn test_unregistered_type() {
    #[derive(Debug, Default, Evolve)]
    struct Stranger {
        #[evolve(id = 1)]
        value: i32,
    }

    let codec = codec();
    let err = codec.serialize(&Stranger::default()).unwrap_err();
    assert!(matches!(err, EvocodeError::Schema(ref msg) if msg.contains("no schema for type")));
}

#[test]
fn test_default_values() -> evocode::Result<()> {
    let codec = codec();
    assert_eq!(codec.default_value::<Profile>()?, Profile::default());
    assert_eq!(codec.default_value::<Option<Profile>>()?, None);
    assert_eq!(codec.default_value::<Vec<u8>>()?, Vec::<u8>::new());

    let a = codec.default_value::<Arc<[u8]>>()?;
    let b = codec.default_value::<Arc<[u8]>>()?;
    assert!(Arc::ptr_eq(&a, &b));
    Ok(())
}

#[test]
fn test_options_from_json() {
    let options: EvocodeOptions = serde_json::from_str(r#"{ "reject_trailing_bytes": false }"#).unwrap();
    assert_eq!(
        options,
        EvocodeOptions {
            reject_trailing_bytes: false,
            ..EvocodeOptions::default()
        }
    );
    let codec = Evocode::builder().options(options.clone()).build().unwrap();
    assert_eq!(codec.options(), &options);
}

#[test]
fn test_clones_share_caches() -> evocode::Result<()> {
    let codec = codec();
    let clone = codec.clone();
    let schema = codec.schema_of::<Profile>()?;

    let a = codec.deserializer::<Profile>(&schema)?;
    let b = clone.deserializer::<Profile>(&schema)?;
    assert!(a.ptr_eq(&b));
    Ok(())
}
