#![allow(missing_docs)]

use std::collections::BTreeMap;

use evocode::{Evocode, EvocodeError, Evolve};

// --- RECORD VERSIONS ---

#[derive(Debug, Default, Clone, PartialEq, Evolve)]
struct OrderV1 {
    #[evolve(id = 2)]
    item: String,
    #[evolve(id = 4)]
    quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Evolve)]
struct OrderV2 {
    #[evolve(id = 1)]
    customer: String,
    #[evolve(id = 2)]
    item: String,
    #[evolve(id = 3)]
    priority: Option<i8>,
    #[evolve(id = 4)]
    quantity: u64,
    #[evolve(id = 5)]
    notes: Vec<String>,
    #[evolve(skip)]
    cached_total: u64,
}

impl Default for OrderV2 {
    fn default() -> Self {
        Self {
            customer: "anonymous".to_string(),
            item: String::new(),
            priority: Some(1),
            quantity: 0,
            notes: Vec::new(),
            cached_total: 99,
        }
    }
}

/// Keeps only the last member of `OrderV2`, so reading V2 data skips a run of four members.
#[derive(Debug, Default, Clone, PartialEq, Evolve)]
struct NotesOnly {
    #[evolve(id = 5)]
    notes: Vec<String>,
}

fn codec() -> Evocode {
    Evocode::builder()
        .register::<OrderV1>()
        .register::<OrderV2>()
        .register::<NotesOnly>()
        .build()
        .unwrap()
}

// --- TESTS ---

/// Members added at the start, in the middle and at the end take their declared defaults.
#[test]
fn test_added_members_take_defaults() -> evocode::Result<()> {
    let codec = codec();
    let v1 = OrderV1 {
        item: "lamp".to_string(),
        quantity: 3,
    };

    let v2: OrderV2 = codec.deserialize(&codec.serialize(&v1)?)?;
    assert_eq!(
        v2,
        OrderV2 {
            item: "lamp".to_string(),
            quantity: 3,
            ..OrderV2::default()
        }
    );
    assert_eq!(v2.customer, "anonymous");
    assert_eq!(v2.priority, Some(1));
    assert_eq!(v2.cached_total, 99);
    Ok(())
}

/// Members removed at any position are skipped without knowing their type.
#[test]
fn test_removed_members_are_skipped() -> evocode::Result<()> {
    let codec = codec();
    let v2 = OrderV2 {
        customer: "Grace".to_string(),
        item: "desk".to_string(),
        priority: None,
        quantity: 70_000,
        notes: vec!["fragile".to_string(), "upstairs".to_string()],
        cached_total: 0,
    };

    let v1: OrderV1 = codec.deserialize(&codec.serialize(&v2)?)?;
    assert_eq!(
        v1,
        OrderV1 {
            item: "desk".to_string(),
            quantity: 70_000,
        }
    );

    let notes: NotesOnly = codec.deserialize(&codec.serialize(&v2)?)?;
    assert_eq!(notes.notes, v2.notes);
    Ok(())
}

#[test]
fn test_nested_evolution_in_collections() -> evocode::Result<()> {
    let codec = codec();
    let orders = vec![
        OrderV1 {
            item: "a".to_string(),
            quantity: 1,
        },
        OrderV1 {
            item: "b".to_string(),
            quantity: 2,
        },
    ];

    let upgraded: Vec<OrderV2> = codec.deserialize(&codec.serialize(&orders)?)?;
    assert_eq!(upgraded.len(), 2);
    assert_eq!(upgraded[1].item, "b");
    assert_eq!(upgraded[1].quantity, 2);
    assert_eq!(upgraded[1].customer, "anonymous");

    let mut by_key = BTreeMap::new();
    by_key.insert(1u16, orders[0].clone());
    let upgraded: BTreeMap<u64, Option<OrderV2>> = codec.deserialize(&codec.serialize(&by_key)?)?;
    assert_eq!(upgraded[&1].as_ref().map(|o| o.quantity), Some(1));
    Ok(())
}

// --- UNIONS ---

#[derive(Debug, Default, Clone, PartialEq, Evolve)]
enum ShapeV1 {
    #[default]
    #[evolve(id = 1)]
    Empty,
    #[evolve(id = 2)]
    Circle(f64),
    #[evolve(id = 3)]
    Label(String),
}

#[derive(Debug, Default, Clone, PartialEq, Evolve)]
enum ShapeV2 {
    #[default]
    #[evolve(id = 1)]
    Empty,
    #[evolve(id = 2)]
    Circle(f32),
    #[evolve(id = 4)]
    Square(i32),
}

#[test]
fn test_union_round_trip() -> evocode::Result<()> {
    let codec = Evocode::builder().register::<ShapeV1>().build()?;
    for shape in [ShapeV1::Empty, ShapeV1::Circle(2.5), ShapeV1::Label("x".to_string())] {
        assert_eq!(codec.deserialize::<ShapeV1>(&codec.serialize(&shape)?)?, shape);
    }
    let list = vec![ShapeV1::Circle(1.0), ShapeV1::Empty];
    assert_eq!(codec.deserialize::<Vec<ShapeV1>>(&codec.serialize(&list)?)?, list);
    Ok(())
}

#[test]
fn test_union_cases_evolve() -> evocode::Result<()> {
    let codec = Evocode::builder()
        .register::<ShapeV1>()
        .register::<ShapeV2>()
        .build()?;

    let circle: ShapeV2 = codec.deserialize(&codec.serialize(&ShapeV1::Circle(1.5))?)?;
    assert_eq!(circle, ShapeV2::Circle(1.5));

    // Case 3 is unknown to the target: its payload is skipped and the default is used.
    let labels = vec![ShapeV1::Label("gone".to_string()), ShapeV1::Circle(4.0)];
    let read: Vec<ShapeV2> = codec.deserialize(&codec.serialize(&labels)?)?;
    assert_eq!(read, vec![ShapeV2::Empty, ShapeV2::Circle(4.0)]);

    let back: ShapeV1 = codec.deserialize(&codec.serialize(&ShapeV2::Square(3))?)?;
    assert_eq!(back, ShapeV1::Empty);
    Ok(())
}

#[test]
fn test_unknown_discriminator_is_malformed() -> evocode::Result<()> {
    let codec = Evocode::builder().register::<ShapeV1>().build()?;
    let mut bytes = codec.serialize(&ShapeV1::Empty)?;
    let header = codec.read_header(&bytes)?;
    // The body is a single varint discriminator.
    assert_eq!(bytes.len(), header.len + 1);
    *bytes.last_mut().unwrap() = 9;

    assert!(matches!(
        codec.deserialize::<ShapeV1>(&bytes),
        Err(EvocodeError::Deserialization(ref msg)) if msg.contains("discriminator 9")
    ));
    Ok(())
}

#[derive(Debug, Default, Clone, PartialEq, Evolve)]
struct Dog {
    #[evolve(id = 1)]
    name: String,
    #[evolve(id = 2)]
    good: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Evolve)]
enum Animal {
    #[default]
    #[evolve(id = 1)]
    Unknown,
    #[evolve(id = 2)]
    Dog(Dog),
    #[evolve(id = 3)]
    Count(i32),
}

#[test]
fn test_record_and_union_interconvert() -> evocode::Result<()> {
    let codec = Evocode::builder().register::<Animal>().build()?;
    let rex = Dog {
        name: "Rex".to_string(),
        good: true,
    };

    let animal: Animal = codec.deserialize(&codec.serialize(&rex)?)?;
    assert_eq!(animal, Animal::Dog(rex.clone()));

    let dog: Dog = codec.deserialize(&codec.serialize(&Animal::Dog(rex.clone()))?)?;
    assert_eq!(dog, rex);

    let dog: Dog = codec.deserialize(&codec.serialize(&Animal::Count(3))?)?;
    assert_eq!(dog, Dog::default());
    Ok(())
}

// --- C-LIKE ENUMS ---

#[derive(Debug, Default, Clone, Copy, PartialEq, Evolve)]
enum ColorV1 {
    #[default]
    Red,
    Green,
    Blue,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Evolve)]
#[evolve(repr = "u8")]
enum ColorV2 {
    Red = 0,
    #[default]
    Green = 1,
}

#[test]
fn test_enum_values_convert() -> evocode::Result<()> {
    let codec = Evocode::builder()
        .register::<ColorV1>()
        .register::<ColorV2>()
        .build()?;

    assert_eq!(codec.deserialize::<ColorV1>(&codec.serialize(&ColorV1::Blue)?)?, ColorV1::Blue);
    assert_eq!(codec.deserialize::<i32>(&codec.serialize(&ColorV1::Blue)?)?, 2);

    assert_eq!(codec.deserialize::<ColorV2>(&codec.serialize(&ColorV1::Red)?)?, ColorV2::Red);
    // Blue is unknown to V2 and reads as its default.
    assert_eq!(codec.deserialize::<ColorV2>(&codec.serialize(&ColorV1::Blue)?)?, ColorV2::Green);

    let palette = vec![Some(ColorV1::Green), None];
    let read: Vec<Option<ColorV2>> = codec.deserialize(&codec.serialize(&palette)?)?;
    assert_eq!(read, vec![Some(ColorV2::Green), None]);
    Ok(())
}

// --- SELF-REFERENTIAL RECORDS ---

#[derive(Debug, Default, Clone, PartialEq, Evolve)]
struct Point {
    #[evolve(id = 1)]
    x: i32,
    #[evolve(id = 2)]
    y: Option<Box<Point>>,
}

#[derive(Debug, Default, Clone, PartialEq, Evolve)]
struct PointV2 {
    #[evolve(id = 1)]
    x: i64,
    #[evolve(id = 2)]
    y: Option<Box<PointV2>>,
    #[evolve(id = 3)]
    label: String,
}

fn chain() -> Point {
    Point {
        x: 5,
        y: Some(Box::new(Point { x: 6, y: None })),
    }
}

#[test]
fn test_self_referential_record() -> evocode::Result<()> {
    let codec = Evocode::builder().register::<Point>().build()?;

    let bytes = codec.serialize(&chain())?;
    assert_eq!(codec.deserialize::<Point>(&bytes)?, chain());

    let schema = codec.schema_of::<Point>()?;
    let nested = &schema.members()[1].schema;
    assert!(nested.is_nullable());
    assert_eq!(nested.contents_id(), schema.contents_id());
    Ok(())
}

#[test]
fn test_self_referential_record_evolves() -> evocode::Result<()> {
    let codec = Evocode::builder()
        .register::<Point>()
        .register::<PointV2>()
        .build()?;

    let read: PointV2 = codec.deserialize(&codec.serialize(&chain())?)?;
    assert_eq!(
        read,
        PointV2 {
            x: 5,
            y: Some(Box::new(PointV2 {
                x: 6,
                y: None,
                label: String::new(),
            })),
            label: String::new(),
        }
    );

    let back: Point = codec.deserialize(&codec.serialize(&read)?)?;
    assert_eq!(back, chain());
    Ok(())
}

// --- MUTUAL RECURSION ---

#[derive(Debug, Default, Clone, PartialEq, Evolve)]
struct Folder {
    #[evolve(id = 1)]
    name: String,
    #[evolve(id = 2)]
    files: Vec<File>,
}

#[derive(Debug, Default, Clone, PartialEq, Evolve)]
struct File {
    #[evolve(id = 1)]
    name: String,
    #[evolve(id = 2)]
    parent: Option<Box<Folder>>,
}

#[test]
fn test_mutually_recursive_records() -> evocode::Result<()> {
    let codec = Evocode::builder().register::<Folder>().build()?;
    let tree = Folder {
        name: "root".to_string(),
        files: vec![File {
            name: "a.txt".to_string(),
            parent: Some(Box::new(Folder {
                name: "shadow".to_string(),
                files: Vec::new(),
            })),
        }],
    };
    assert_eq!(codec.deserialize::<Folder>(&codec.serialize(&tree)?)?, tree);
    assert!(codec.contents_id_of::<File>()?.is_some());
    assert_ne!(codec.contents_id_of::<File>()?, codec.contents_id_of::<Folder>()?);
    Ok(())
}
