#![allow(missing_docs)]

use evocode::{Evocode, EvocodeInspector, Evolve};

#[derive(Debug, Default, Clone, PartialEq, Evolve)]
struct Link {
    #[evolve(id = 1)]
    label: String,
    #[evolve(id = 2)]
    next: Option<Box<Link>>,
}

#[test]
fn test_inspect_record_header() -> evocode::Result<()> {
    let codec = Evocode::builder().register::<Link>().build()?;
    let bytes = codec.serialize(&vec![Link {
        label: "head".to_string(),
        next: None,
    }])?;

    let report = EvocodeInspector::inspect(&codec, &bytes)?;
    assert_eq!(report.tag, "Full");
    assert_eq!(report.block, codec.latest_block().map(|b| b.0));
    assert_eq!(report.header_size + report.body_size, bytes.len());

    // Array<Record> -> Record members -> the nested link closes the cycle.
    let array = &report.schema;
    assert!(array.label.starts_with("Array<Record#"));
    let record = &array.children[0];
    assert_eq!(record.children.len(), 2);
    assert_eq!(record.children[0].member_id, Some(1));
    assert_eq!(record.children[0].label, "String");
    assert_eq!(record.children[1].member_id, Some(2));
    assert!(record.children[1].recursive);
    assert!(record.children[1].label.ends_with('?'));

    let rendered = report.to_string();
    assert!(rendered.contains("=== EVOCODE INSPECTOR REPORT ==="));
    assert!(rendered.contains("(recursive)"));
    assert!(rendered.contains("└── "));

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["tag"], "Full");
    assert_eq!(json["schema"]["children"][0]["children"][1]["recursive"], true);
    Ok(())
}

#[test]
fn test_inspect_raw_header() -> evocode::Result<()> {
    let codec = Evocode::builder().build()?;
    let report = EvocodeInspector::inspect(&codec, &codec.serialize(&-1i64)?)?;
    assert_eq!(report.tag, "Long");
    assert_eq!(report.block, None);
    assert_eq!((report.header_size, report.body_size), (1, 8));
    assert_eq!(report.schema.label, "Long");
    assert!(report.schema.children.is_empty());
    Ok(())
}
