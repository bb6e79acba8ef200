use std::time::Duration;

use trajectory_writer::{
    InMemoryEngine, ItemColumn, MemoryEngineConfig, Nest, Path, Record, Tensor, Trajectory, TrajectoryWriter,
    WriterError,
};

fn writer_with_table(capacity: usize) -> (TrajectoryWriter<InMemoryEngine>, trajectory_writer::TableReader) {
    let engine = InMemoryEngine::new(&MemoryEngineConfig::default().with_table("dist", capacity)).unwrap();
    let reader = engine.reader("dist").unwrap();
    (TrajectoryWriter::new(engine), reader)
}

#[test]
fn episode_round_trip_delivers_item_values() {
    let (mut writer, reader) = writer_with_table(8);

    for i in 0..4i64 {
        writer.append_partial(Record::fields([("observation", i)])).unwrap();
        writer
            .append(Record::map([
                ("action", Record::value(i * 10)),
                ("reward", Record::value(0.5f64)),
            ]))
            .unwrap();
    }
    assert_eq!(writer.episode_steps(), 4);

    let history = writer.history().unwrap();
    let observation = history.column(&Path::from("observation")).unwrap();
    let action = history.column(&Path::from("action")).unwrap();
    let trajectory = Trajectory::columns([
        ("observation", observation.select(-3..).unwrap()),
        ("action", action.select(-1).unwrap()),
    ]);
    writer.create_item("dist", 2.0, trajectory).unwrap();
    writer.flush(0, Some(Duration::from_secs(1))).unwrap();

    let item = reader.try_recv().unwrap();
    assert_eq!(item.table, "dist");
    assert_eq!(item.priority, 2.0);
    assert_eq!(
        item.columns,
        vec![
            ItemColumn::Squeezed(Tensor::from(30i64)),
            ItemColumn::Stacked(vec![Tensor::from(1i64), Tensor::from(2i64), Tensor::from(3i64)]),
        ]
    );

    writer.end_episode(true, Some(Duration::from_secs(1))).unwrap();
    assert_eq!(writer.episode_steps(), 0);
    assert_eq!(writer.engine().episode_count(), 1);
    assert_eq!(writer.history().unwrap().num_steps(), 0);
}

#[test]
fn nested_history_structure_mirrors_records() {
    let (mut writer, _reader) = writer_with_table(8);
    writer
        .append(Record::map([
            ("obs", Record::seq([Record::value(1.0f64), Record::value(2.0f64)])),
            ("meta", Record::map([("step", Record::value(0i64))])),
        ]))
        .unwrap();

    let history = writer.history().unwrap();
    assert_eq!(history.num_columns(), 3);
    let paths: Vec<String> = history.paths().iter().map(ToString::to_string).collect();
    assert_eq!(paths, vec!["('meta', 'step')", "('obs', 0)", "('obs', 1)"]);

    let structure = history.structure().unwrap();
    let Some(Nest::Seq(obs)) = structure.get(&Path::from("obs")) else {
        panic!("obs should be a sequence");
    };
    assert_eq!(obs.len(), 2);
    let Some(Nest::Leaf(second)) = structure.get(&Path::from(["obs"]).join(1usize)) else {
        panic!("obs[1] should be a leaf");
    };
    assert_eq!(second.get(0).unwrap().value().unwrap(), Tensor::from(2.0f64));
}

#[test]
fn selections_survive_while_inside_keep_alive_window() {
    let config = MemoryEngineConfig::default()
        .with_max_num_keep_alive_refs(2)
        .with_table("dist", 4);
    let engine = InMemoryEngine::new(&config).unwrap();
    let mut writer = TrajectoryWriter::new(engine);

    for i in 0..3i64 {
        writer.append(Record::fields([("x", i)])).unwrap();
    }
    let x = writer.history().unwrap().column(&Path::from("x")).unwrap();
    let recent = x.select(-2..).unwrap();
    let evicted = x.select(0).unwrap();

    assert_eq!(recent.values().unwrap(), vec![Tensor::from(1i64), Tensor::from(2i64)]);
    assert!(evicted.values().is_err());

    let err = writer.create_item("dist", 1.0, evicted).unwrap_err();
    assert!(err.is_engine());
    writer.create_item("dist", 1.0, recent).unwrap();
}

#[test]
fn scoped_writer_flushes_items_on_success() {
    let (mut writer, reader) = writer_with_table(8);
    writer
        .scoped(|w| {
            w.append(Record::fields([("x", 1i64)]))?;
            let x = w.history()?.column(&Path::from("x"))?.select(0)?;
            w.create_item("dist", 1.0, x)?;
            Ok::<_, WriterError>(())
        })
        .unwrap();
    assert_eq!(writer.engine().outstanding_items(), 0);
    assert_eq!(reader.len(), 1);
}

#[test]
fn configured_columns_reach_engine() {
    let (mut writer, _reader) = writer_with_table(8);
    writer.configure(["late"], 3, Some(2)).unwrap();
    writer.append(Record::fields([("early", 1i64)])).unwrap();
    writer.append(Record::fields([("late", 1i64)])).unwrap();

    let late = writer.history().unwrap().column(&Path::from("late")).unwrap().column_id();
    let options = writer.engine().chunker_options(late).unwrap();
    assert_eq!(options.num_keep_alive_refs(), 3);
}
