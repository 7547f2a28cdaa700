use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use flatwire::codec::context::SerializationContext;
use flatwire::codec::primitives::ByteSource;
use flatwire::codec::view::Materialization;
use flatwire::codec::writer::Writer;
use flatwire::schema::ast::{FieldDecl, ObjectDecl, SchemaFile, UnionDecl};
use flatwire::schema::types::ScalarType;
use flatwire::{
    CompiledSchema, DeserializationOption, Error, IndexedVector, InputBuffer, Node, ObjectValue, PodStruct,
    SchemaCompiler, Serializer, SerializerSettings, SortKey, TableAccess, TableView, UnionValue, Value,
};

const ALL_OPTIONS: [DeserializationOption; 4] = [
    DeserializationOption::Greedy,
    DeserializationOption::GreedyMutable,
    DeserializationOption::Progressive,
    DeserializationOption::Lazy,
];

fn game_schema() -> Arc<CompiledSchema> {
    let file = SchemaFile::new("game.fbs")
        .namespace("game")
        .object(
            ObjectDecl::structure("Vec2")
                .field(FieldDecl::new("x", "float"))
                .field(FieldDecl::new("y", "float")),
        )
        .object(
            ObjectDecl::table("Weapon")
                .field(FieldDecl::new("name", "string").attr("key"))
                .field(FieldDecl::new("damage", "short")),
        )
        .object(
            ObjectDecl::table("Point")
                .field(FieldDecl::new("x", "int"))
                .field(FieldDecl::new("y", "int")),
        )
        .union(UnionDecl::new("Equipment").member("Weapon").member("Vec2"))
        .object(
            ObjectDecl::table("Monster")
                .field(FieldDecl::new("name", "string"))
                .field(FieldDecl::new("hp", "short").default_value("100"))
                .field(FieldDecl::new("mana", "short").default_value("150"))
                .field(FieldDecl::new("friend", "Monster"))
                .field(FieldDecl::new("weapons", "[Weapon]").attr("sorted_vector"))
                .field(FieldDecl::new("points", "[Point]"))
                .field(FieldDecl::new("equipped", "Equipment"))
                .field(FieldDecl::new("loot", "[Equipment]"))
                .field(FieldDecl::new("title", "string").attr("shared"))
                .field(FieldDecl::new("nickname", "string").attr("shared")),
        )
        .object(
            ObjectDecl::table("Stats")
                .field(FieldDecl::new("hp", "short").attr("required").attr("write_through"))
                .field(FieldDecl::new("armor", "short"))
                .field(FieldDecl::new("motto", "string"))
                .field(FieldDecl::new("buffs", "[short]")),
        )
        .object(
            ObjectDecl::structure("Coord")
                .attr("value_struct")
                .field(FieldDecl::new("x", "float"))
                .field(FieldDecl::new("y", "float"))
                .field(FieldDecl::new("z", "float")),
        )
        .object(
            ObjectDecl::table("Waypoint")
                .field(FieldDecl::new("label", "string"))
                .field(FieldDecl::new("pos", "Coord")),
        )
        .object(
            ObjectDecl::table("Slot")
                .field(FieldDecl::new("id", "int").attr("key"))
                .field(FieldDecl::new("item", "string")),
        )
        .object(ObjectDecl::table("Inventory").field(FieldDecl::new("slots", "[Slot]").attr("indexed_vector")))
        .root_type("Monster")
        .file_identifier("MONS");
    Arc::new(SchemaCompiler::new().compile_file(&file).unwrap())
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
struct Coord {
    x: f32,
    y: f32,
    z: f32,
}

static COORDS_DECODED: AtomicUsize = AtomicUsize::new(0);

impl PodStruct for Coord {
    fn to_object(&self) -> ObjectValue {
        COORDS_DECODED.fetch_add(1, Ordering::SeqCst);
        ObjectValue::new().with("x", self.x).with("y", self.y).with("z", self.z)
    }
}

fn monster_serializer() -> Serializer {
    Serializer::new(game_schema()).unwrap()
}

fn weapon(name: &str, damage: i16) -> Value {
    Value::Table(ObjectValue::new().with("name", name).with("damage", damage))
}

fn point(x: i32, y: i32) -> Value {
    Value::Table(ObjectValue::new().with("x", x).with("y", y))
}

fn vec2(x: f32, y: f32) -> Value {
    Value::Struct(ObjectValue::new().with("x", x).with("y", y))
}

/// A monster with every field set; scalars are explicit so parsed copies compare equal.
fn full_monster() -> ObjectValue {
    let friend = ObjectValue::new().with("name", "Navi").with("hp", 100i16).with("mana", 150i16);
    ObjectValue::new()
        .with("name", "Link")
        .with("hp", 932i16)
        .with("mana", 150i16)
        .with("friend", friend)
        .with("weapons", Value::Vector(vec![weapon("bow", 2), weapon("sword", 5)]))
        .with("points", Value::Vector(vec![point(1, 2), point(3, 4)]))
        .with("equipped", UnionValue::new(1, weapon("shield", 1)))
        .with(
            "loot",
            Value::Vector(vec![
                Value::Union(UnionValue::new(2, vec2(0.5, 1.5))),
                Value::Union(UnionValue::none()),
                Value::Union(UnionValue::new(1, weapon("boomerang", 3))),
            ]),
        )
        .with("title", "Hero")
        .with("nickname", "Hero")
}

fn nested(depth: usize) -> ObjectValue {
    let mut monster = ObjectValue::new().with("name", format!("m{}", depth));
    for level in (1..depth).rev() {
        monster = ObjectValue::new().with("name", format!("m{}", level)).with("friend", monster);
    }
    monster
}

fn walk_friends<M: Materialization>(root: &TableView<'_, M>) -> flatwire::Result<usize> {
    let mut depth = 1;
    let mut current = root.get("friend")?;
    while let Some(node) = current {
        depth += 1;
        let table = node.as_table().cloned().ok_or_else(|| Error::CorruptBuffer("friend".to_string()))?;
        current = table.get("friend")?;
    }
    Ok(depth)
}

#[test]
fn test_link_defaults_and_absent_slots() {
    let serializer = monster_serializer();
    let link = ObjectValue::new().with("name", "Link").with("hp", 932i16).with("mana", 150i16);
    let bytes = serializer.write_to_vec(&link).unwrap();

    let schema = serializer.schema();
    let monster = schema.registry.object(schema.root_type.unwrap()).unwrap();
    let mana_slot = monster.field("mana").unwrap().1.index as usize;
    let hp_slot = monster.field("hp").unwrap().1.index as usize;
    let root = bytes.read_uoffset(0).unwrap();
    assert_eq!(bytes.field_location(root, mana_slot).unwrap(), 0);
    assert_ne!(bytes.field_location(root, hp_slot).unwrap(), 0);

    let buffer = InputBuffer::from_vec(bytes.clone());
    for option in ALL_OPTIONS {
        let parsed = serializer.parse_with(&buffer, option).unwrap();
        assert_eq!(parsed.field("hp").unwrap(), Some(Value::Int16(932)));
        assert_eq!(parsed.field("mana").unwrap(), Some(Value::Int16(150)));
    }

    let mut forced = link.clone();
    forced.set("mana", 151i16).unwrap();
    assert!(serializer.write_to_vec(&forced).unwrap().len() > bytes.len());
}

#[test]
fn test_identical_tables_share_one_vtable() {
    let serializer = monster_serializer();
    let schema = serializer.schema();
    let value = ObjectValue::new().with(
        "points",
        Value::Vector(vec![point(1, 2), point(1, 2), point(3, 4)]),
    );

    let writer = Writer::new(&schema.registry);
    let mut buffer = vec![0u8; writer.max_size(schema.root_type.unwrap(), &value).unwrap()];
    let mut ctx = SerializationContext::new();
    ctx.reset(buffer.len());
    writer
        .write_root(&mut ctx, &mut buffer, schema.root_type.unwrap(), &value, schema.file_identifier)
        .unwrap();

    // One vtable for the monster and one shared by the three points.
    let stats = ctx.stats();
    assert_eq!(stats.vtables_written, 2);
    assert_eq!(stats.vtables_reused, 2);
}

#[test]
fn test_sorted_vector_order_and_binary_search() {
    let serializer = monster_serializer();
    let value = ObjectValue::new().with(
        "weapons",
        Value::Vector(vec![
            weapon("sword", 5),
            weapon("axe", 4),
            weapon("Zweihander", 9),
            weapon("bow", 2),
        ]),
    );
    let buffer = InputBuffer::from_vec(serializer.write_to_vec(&value).unwrap());
    let monster = serializer.parse_progressive(&buffer).unwrap();
    let weapons = monster.get("weapons").unwrap().unwrap();
    let weapons = weapons.as_vector().unwrap();

    let names: Vec<String> = (0..weapons.len())
        .map(|i| {
            let node = weapons.get(i).unwrap();
            node.as_table().unwrap().field_value("name").unwrap().unwrap().as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(names, vec!["Zweihander", "axe", "bow", "sword"]);

    let bow = weapons.binary_search("bow").unwrap().unwrap();
    assert_eq!(bow.field_value("damage").unwrap(), Some(Value::Int16(2)));
    assert!(weapons.binary_search("club").unwrap().is_none());
}

#[test]
fn test_depth_limit_boundary() {
    let serializer = monster_serializer();
    let bytes = serializer.write_to_vec(&nested(5)).unwrap();
    let buffer = InputBuffer::from_vec(bytes);

    let at_limit = serializer.with_settings(SerializerSettings::default().with_max_depth(5));
    at_limit.parse_with(&buffer, DeserializationOption::Greedy).unwrap();
    assert_eq!(walk_friends(&at_limit.parse_progressive(&buffer).unwrap()).unwrap(), 5);
    assert_eq!(walk_friends(&at_limit.parse_lazy(&buffer).unwrap()).unwrap(), 5);

    let below = serializer.with_settings(SerializerSettings::default().with_max_depth(4));
    let err = below.parse_with(&buffer, DeserializationOption::Greedy).unwrap_err();
    assert!(matches!(err, Error::DepthLimitExceeded { limit: 4 }));
    let err = walk_friends(&below.parse_lazy(&buffer).unwrap()).unwrap_err();
    assert!(matches!(err, Error::DepthLimitExceeded { limit: 4 }));
}

#[test]
fn test_mutability_matrix() {
    let schema = game_schema();
    let stats = Serializer::for_type(Arc::clone(&schema), "game.Stats").unwrap();
    let bytes = stats
        .write_to_vec(&ObjectValue::new().with("hp", 10i16).with("armor", 3i16))
        .unwrap();

    // (option, field, succeeds)
    let matrix = [
        (DeserializationOption::Greedy, "hp", false),
        (DeserializationOption::Greedy, "armor", false),
        (DeserializationOption::GreedyMutable, "hp", true),
        (DeserializationOption::GreedyMutable, "armor", true),
        (DeserializationOption::Progressive, "hp", true),
        (DeserializationOption::Progressive, "armor", false),
        (DeserializationOption::Lazy, "hp", true),
        (DeserializationOption::Lazy, "armor", false),
    ];
    for (option, field, succeeds) in matrix {
        let buffer = InputBuffer::from_vec(bytes.clone());
        let mut parsed = stats.parse_with(&buffer, option).unwrap();
        let result = parsed.set_field(field, Value::Int16(77));
        if succeeds {
            assert!(result.is_ok(), "{:?} {} should be writable", option, field);
            assert_eq!(parsed.field(field).unwrap(), Some(Value::Int16(77)));
        } else {
            let err = result.unwrap_err();
            assert!(err.is_not_mutable(), "{:?} {} gave {}", option, field, err);
        }
    }
}

#[test]
fn test_write_through_lands_in_buffer() {
    let schema = game_schema();
    let stats = Serializer::for_type(schema, "game.Stats").unwrap();
    let bytes = stats.write_to_vec(&ObjectValue::new().with("hp", 10i16)).unwrap();
    let buffer = InputBuffer::from_vec(bytes);

    let mut parsed = stats.parse_with(&buffer, DeserializationOption::Progressive).unwrap();
    parsed.set_field("hp", Value::Int16(55)).unwrap();
    drop(parsed);

    let written = buffer.to_vec();
    let greedy = stats.parse_greedy(&InputBuffer::read_only(&written), false).unwrap();
    assert_eq!(greedy.get("hp"), Some(&Value::Int16(55)));
}

#[test]
fn test_read_only_buffer_with_write_through() {
    let schema = game_schema();
    let stats = Serializer::for_type(schema, "game.Stats").unwrap();
    let bytes = stats.write_to_vec(&ObjectValue::new().with("hp", 10i16)).unwrap();
    let buffer = InputBuffer::read_only(&bytes);

    assert!(matches!(stats.parse_progressive(&buffer), Err(Error::ReadOnlyBuffer(_))));
    assert!(matches!(stats.parse_lazy(&buffer), Err(Error::ReadOnlyBuffer(_))));
    let greedy = stats.parse_with(&buffer, DeserializationOption::Greedy).unwrap();
    assert_eq!(greedy.field("hp").unwrap(), Some(Value::Int16(10)));
}

#[test]
fn test_round_trip_every_option() {
    let serializer = monster_serializer();
    let original = full_monster();
    let bytes = serializer.write_to_vec(&original).unwrap();
    serializer.verify(&bytes).unwrap();
    let buffer = InputBuffer::from_vec(bytes);

    for option in ALL_OPTIONS {
        let parsed = serializer.parse_with(&buffer, option).unwrap();
        let copy = parsed.to_value().unwrap();
        assert_eq!(copy, original, "{:?}", option);

        // Re-serializing a parsed graph yields the same object graph.
        let again = serializer.write_to_vec(&copy).unwrap();
        let again = InputBuffer::from_vec(again);
        let reparsed = serializer.parse_with(&again, option).unwrap();
        assert_eq!(reparsed.to_value().unwrap(), original, "{:?}", option);
    }
}

#[test]
fn test_progressive_returns_same_instances() {
    let serializer = monster_serializer();
    let buffer = InputBuffer::from_vec(serializer.write_to_vec(&full_monster()).unwrap());

    let progressive = serializer.parse_progressive(&buffer).unwrap();
    for field in ["friend", "name", "weapons"] {
        let first = progressive.get(field).unwrap().unwrap();
        let second = progressive.get(field).unwrap().unwrap();
        assert!(first.same_instance(&second), "{}", field);
    }
    let weapons = progressive.get("weapons").unwrap().unwrap();
    let weapons = weapons.as_vector().unwrap();
    assert!(weapons.get(0).unwrap().same_instance(&weapons.get(0).unwrap()));

    let lazy = serializer.parse_lazy(&buffer).unwrap();
    for field in ["friend", "name", "weapons"] {
        let first = lazy.get(field).unwrap().unwrap();
        let second = lazy.get(field).unwrap().unwrap();
        assert!(!first.same_instance(&second), "{}", field);
    }
}

#[test]
fn test_unions_through_views() {
    let serializer = monster_serializer();
    let buffer = InputBuffer::from_vec(serializer.write_to_vec(&full_monster()).unwrap());
    let monster = serializer.parse_lazy(&buffer).unwrap();

    match monster.get("equipped").unwrap().unwrap() {
        Node::Union { discriminator, member } => {
            assert_eq!(discriminator, 1);
            let member = member.unwrap();
            let weapon = member.as_table().unwrap();
            assert_eq!(weapon.field_value("name").unwrap(), Some(Value::String("shield".to_string())));
        }
        other => panic!("expected a union, got {:?}", other),
    }

    let loot = monster.get("loot").unwrap().unwrap();
    let loot = loot.as_vector().unwrap();
    assert_eq!(loot.len(), 3);
    let discriminators: Vec<u16> = (0..loot.len())
        .map(|i| match loot.get(i).unwrap() {
            Node::Union { discriminator, .. } => discriminator,
            _ => u16::MAX,
        })
        .collect();
    assert_eq!(discriminators, vec![2, 0, 1]);
}

#[test]
fn test_file_identifier_is_checked() {
    let serializer = monster_serializer();
    let mut bytes = serializer.write_to_vec(&full_monster()).unwrap();
    assert_eq!(&bytes[4..8], b"MONS");
    bytes[4..8].copy_from_slice(b"XXXX");

    assert!(matches!(serializer.verify(&bytes), Err(Error::CorruptBuffer(_))));
    let buffer = InputBuffer::from_vec(bytes);
    for option in ALL_OPTIONS {
        let err = serializer.parse_with(&buffer, option).unwrap_err();
        assert!(matches!(err, Error::CorruptBuffer(_)), "{:?}", option);
    }
}

#[test]
fn test_shared_strings_are_written_once() {
    let serializer = monster_serializer();
    let value = ObjectValue::new()
        .with("title", "the hero of time")
        .with("nickname", "the hero of time");

    let shared = serializer.write_to_vec(&value).unwrap();
    let unshared = serializer
        .with_settings(SerializerSettings::default().with_shared_strings(false))
        .write_to_vec(&value)
        .unwrap();
    assert!(shared.len() < unshared.len());

    let buffer = InputBuffer::from_vec(shared);
    let parsed = serializer.parse_with(&buffer, DeserializationOption::Greedy).unwrap();
    assert_eq!(parsed.field("nickname").unwrap(), Some(Value::String("the hero of time".to_string())));
}

#[test]
fn test_truncated_buffers_are_corrupt() {
    let serializer = monster_serializer();
    let bytes = serializer.write_to_vec(&full_monster()).unwrap();
    let truncated = &bytes[..bytes.len() / 2];
    let err = serializer.verify(truncated).unwrap_err();
    assert!(err.is_corrupt_buffer(), "{}", err);
}

#[test]
fn test_write_through_keeps_cached_instances() {
    let stats = Serializer::for_type(game_schema(), "game.Stats").unwrap();
    let value = ObjectValue::new()
        .with("hp", 10i16)
        .with("motto", "onward")
        .with("buffs", Value::Vector(vec![Value::Int16(1), Value::Int16(2)]));
    let buffer = InputBuffer::from_vec(stats.write_to_vec(&value).unwrap());

    let view = stats.parse_progressive(&buffer).unwrap();
    let motto = view.get("motto").unwrap().unwrap();
    let buffs = view.get("buffs").unwrap().unwrap();
    assert_eq!(view.field_value("hp").unwrap(), Some(Value::Int16(10)));

    view.set("hp", 64i16).unwrap();
    assert_eq!(view.field_value("hp").unwrap(), Some(Value::Int16(64)));
    assert!(view.get("motto").unwrap().unwrap().same_instance(&motto));
    assert!(view.get("buffs").unwrap().unwrap().same_instance(&buffs));

    let lazy = stats.parse_lazy(&buffer).unwrap();
    assert_eq!(lazy.field_value("hp").unwrap(), Some(Value::Int16(64)));
}

#[test]
fn test_value_structs_through_bound_type() {
    let mut waypoints = Serializer::for_type(game_schema(), "game.Waypoint").unwrap();
    waypoints.register_pod::<Coord>("game.Coord").unwrap();
    let pos = ObjectValue::new().with("x", 1.5f32).with("y", -2.0f32).with("z", 8.25f32);
    let value = ObjectValue::new().with("label", "camp").with("pos", Value::Struct(pos));
    let bytes = waypoints.write_to_vec(&value).unwrap();

    let buffer = InputBuffer::from_vec(bytes.clone());
    let greedy = waypoints.parse_greedy(&buffer, false).unwrap();
    assert_eq!(greedy, value);

    let before = COORDS_DECODED.load(Ordering::SeqCst);
    let progressive = waypoints.parse_progressive(&buffer).unwrap();
    assert_eq!(progressive.field_value("pos").unwrap().as_ref(), greedy.get("pos"));
    assert_eq!(progressive.to_value().unwrap(), greedy);
    let lazy = waypoints.parse_lazy(&buffer).unwrap();
    assert_eq!(lazy.to_value().unwrap(), greedy);
    assert!(COORDS_DECODED.load(Ordering::SeqCst) >= before + 2);

    let expected = Coord { x: 1.5, y: -2.0, z: 8.25 };
    // Owned arrays are not pinned, so the struct is copied out.
    match lazy.get_pod::<Coord>("pos").unwrap().unwrap() {
        Cow::Owned(coord) => assert_eq!(coord, expected),
        Cow::Borrowed(_) => panic!("owned buffers cannot lend structs"),
    }

    let read_only = InputBuffer::read_only(&bytes);
    let view = waypoints.parse_progressive(&read_only).unwrap();
    assert_eq!(view.to_value().unwrap(), greedy);
    let coord = view.get_pod::<Coord>("pos").unwrap().unwrap();
    assert_eq!(*coord, expected);
    if bytes.as_ptr() as usize % std::mem::align_of::<Coord>() == 0 {
        assert!(matches!(coord, Cow::Borrowed(_)));
    }

    // Without a bound type the views fall back to field-by-field reads.
    let unbound = Serializer::for_type(game_schema(), "game.Waypoint").unwrap();
    let plain = unbound.parse_lazy(&buffer).unwrap();
    assert_eq!(plain.to_value().unwrap(), greedy);
    assert!(matches!(plain.get_pod::<Coord>("pos"), Err(Error::InvalidOperation(_))));
}

#[test]
fn test_indexed_vector_keys_follow_key_field_type() {
    let inventory = Serializer::for_type(game_schema(), "game.Inventory").unwrap();
    let mut slots = IndexedVector::new("id");
    slots
        .insert(ObjectValue::new().with("id", Value::UInt32(7)).with("item", "lamp"))
        .unwrap();
    slots
        .insert(ObjectValue::new().with("id", Value::UInt32(3)).with("item", "rope"))
        .unwrap();
    let bytes = inventory.write_to_vec(&ObjectValue::new().with("slots", slots)).unwrap();
    let buffer = InputBuffer::from_vec(bytes);

    for option in ALL_OPTIONS {
        let parsed = inventory.parse_with(&buffer, option).unwrap();
        match parsed.field("slots").unwrap() {
            Some(Value::Indexed(slots)) => {
                assert_eq!(slots.key_type(), Some(ScalarType::Int), "{:?}", option);
                let lamp = slots.get(&SortKey::Unsigned(7)).unwrap();
                assert_eq!(lamp.get("item"), Some(&Value::String("lamp".to_string())));
                assert!(slots.get(&SortKey::Signed(3)).is_some(), "{:?}", option);
            }
            other => panic!("expected an indexed vector under {:?}, got {:?}", option, other),
        }
    }
}
