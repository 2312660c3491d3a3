// Table model and STAR session integration tests.
use emio::api::{
    ArrayDim, Column, ErrorKind, FileMode, Image, Object, Row, Table, TableIo, Type, register_builtin,
};

fn points() -> Table {
    let mut table = Table::with_columns([Column::new("x", Type::int32()), Column::new("y", Type::float())])
        .expect("columns");
    for (x, y) in [(1i32, 1.1f32), (2, 2.2), (3, 3.3)] {
        let mut row = table.create_row();
        row.set("x", x).expect("x");
        row.set("y", y).expect("y");
        table.add_row(&row).expect("add");
    }
    table
}

#[test]
fn delete_rows_by_query_keeps_the_rest() {
    let mut table = points();
    assert_eq!(table.delete_rows("x > 1").expect("delete"), 2);
    assert_eq!(table.len(), 1);
    assert_eq!(table.row(0).unwrap().get("x").unwrap().get::<i32>().unwrap(), 1);
}

#[test]
fn closures_select_and_update_rows() {
    let mut table = points();
    let is_even = |row: &Row| {
        row.get("x")
            .and_then(|x| x.get::<i32>())
            .is_ok_and(|x| x % 2 == 0)
    };
    let double_y = |row: &mut Row| -> Result<(), emio::api::Error> {
        let y = row.get("y")?.get::<f32>()?;
        row.set("y", y * 2.0)
    };
    assert_eq!(table.update_rows_matching(&double_y, &is_even).expect("update"), 1);
    assert_eq!(table.row(1).unwrap().get("y").unwrap().get::<f32>().unwrap(), 4.4);
    assert_eq!(table.delete_rows_matching(&is_even).expect("delete"), 1);
    assert_eq!(table.len(), 2);
}

#[test]
fn failed_updates_leave_the_table_untouched() {
    let mut table = points();
    let before: Vec<String> = table.iter().map(Row::to_string).collect();
    let err = table
        .update_rows(".x = \"text\"", "x >= 1")
        .expect_err("string into int column");
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    let after: Vec<String> = table.iter().map(Row::to_string).collect();
    assert_eq!(before, after);
}

#[test]
fn schema_changes_repair_every_row() {
    let mut table = points();
    let err = table.add_column(Column::new("z", Type::double())).expect_err("rows exist");
    assert_eq!(err.kind(), ErrorKind::Usage);
    table
        .insert_column_with_default(Column::new("label", Type::string()), 0, &Object::new("p".to_string()))
        .expect("insert");
    table.move_column("x", 2).expect("move");
    table.remove_column("y").expect("remove");
    assert_eq!(table.column_at(0).unwrap().name(), "label");
    assert_eq!(table.column_at(1).unwrap().name(), "x");
    let label_id = table.column("label").unwrap().id().expect("assigned id");
    for row in &table {
        assert_eq!(row.len(), 2);
        assert_eq!(row.get(label_id).unwrap().ty(), Type::string());
        assert_eq!(row.get("x").unwrap().ty(), Type::int32());
    }
    assert_eq!(table.row(2).unwrap().to_string(), "p 3");
}

#[test]
fn star_files_round_trip_through_sessions() {
    register_builtin();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("points.star");

    let mut io = TableIo::new();
    io.open(&path, FileMode::Truncate).expect("create");
    io.write("points", &points()).expect("write");
    io.close();

    io.open(&path, FileMode::ReadWrite).expect("append");
    let mut extra = Table::with_columns([Column::new("note", Type::string())]).expect("columns");
    let mut row = extra.create_row();
    row.set("note", "two words".to_string()).expect("note");
    extra.add_row(&row).expect("add");
    io.write("notes", &extra).expect("append block");
    io.close();

    io.open(&path, FileMode::ReadOnly).expect("read");
    assert_eq!(io.table_names().unwrap(), vec!["points", "notes"]);
    let mut table = Table::new();
    io.read("points", &mut table).expect("points");
    assert_eq!(table.column("x").unwrap().ty(), Type::int32());
    assert_eq!(table.column("y").unwrap().ty(), Type::float());
    assert_eq!(table.row(2).unwrap().to_string(), "3 3.3");

    io.read("notes", &mut table).expect("notes");
    assert_eq!(table.row(0).unwrap().get("note").unwrap().to_string(), "two words");

    let err = io.read("missing", &mut table).expect_err("missing");
    assert_eq!(err.kind(), ErrorKind::Usage);
    assert!(err.message().unwrap().contains("no data block"));
}

#[test]
fn xmd_files_use_the_star_codec() {
    register_builtin();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("images.xmd");
    std::fs::write(
        &path,
        "# XMIPP_STAR_1 *\ndata_images\nloop_\n _image\n _enabled\n 1@stack.stk 1\n 2@stack.stk -1\n",
    )
    .expect("write");

    let mut io = TableIo::new();
    io.open(&path, FileMode::ReadOnly).expect("open");
    let mut table = Table::new();
    io.read("", &mut table).expect("first block");
    assert_eq!(table.len(), 2);
    assert_eq!(table.delete_rows("enabled < 0").unwrap(), 1);
}

#[test]
fn loop_blocks_read_into_typed_columns() {
    register_builtin();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("particles.star");
    std::fs::write(
        &path,
        "# version 30001\n\ndata_particles\n\nloop_\n_rlnImageName #1\n_rlnDefocusU #2\n_rlnClassNumber #3\n\
         1@stack.mrcs 12000.5 1\n'2@other stack.mrcs' 25000 2\n",
    )
    .expect("write");

    let mut io = TableIo::new();
    io.open(&path, FileMode::ReadOnly).expect("open");
    let mut table = Table::new();
    io.read("particles", &mut table).expect("read");
    io.close();

    assert_eq!(table.len(), 2);
    assert_eq!(table.column("rlnClassNumber").unwrap().ty(), Type::int32());
    let second = table.row(1).unwrap();
    assert_eq!(second.get("rlnImageName").unwrap().to_string(), "2@other stack.mrcs");
    assert_eq!(second.get("rlnDefocusU").unwrap().get::<f32>().unwrap(), 25000.0);
    assert_eq!(second.get("rlnClassNumber").unwrap().get::<i32>().unwrap(), 2);
    assert_eq!(table.row(0).unwrap().get("rlnDefocusU").unwrap().get::<f32>().unwrap(), 12000.5);
}

#[test]
fn updates_keep_wide_integers_exact() {
    let mut table = Table::with_columns([Column::new("k", Type::int32()), Column::new("big", Type::int64())])
        .expect("columns");
    for (k, big) in [(1i32, 9_007_199_254_740_993i64), (3, -9_007_199_254_740_993)] {
        let mut row = table.create_row();
        row.set("k", k).expect("k");
        row.set("big", big).expect("big");
        table.add_row(&row).expect("add");
    }

    assert_eq!(table.update_rows(".k = 2", "k == 1").expect("update"), 1);
    let first = table.row(0).unwrap();
    assert_eq!(first.get("k").unwrap().get::<i32>().unwrap(), 2);
    assert_eq!(first.get("big").unwrap().get::<i64>().unwrap(), 9_007_199_254_740_993);

    assert_eq!(table.update_rows(".big += 1", "k == 3").expect("update"), 1);
    assert_eq!(
        table.row(1).unwrap().get("big").unwrap().get::<i64>().unwrap(),
        -9_007_199_254_740_992
    );
    assert_eq!(table.delete_rows("big == 9007199254740993").expect("delete"), 1);
}

#[test]
fn updates_leave_opaque_columns_alone() {
    let mut table = Table::with_columns([
        Column::new("k", Type::int32()),
        Column::new("image", Type::get::<Image>()),
    ])
    .expect("columns");
    let mut row = table.create_row();
    row.set("k", 1i32).expect("k");
    row.set("image", Image::with_dim(ArrayDim::new(2, 2, 1, 1), Type::float()))
        .expect("image");
    table.add_row(&row).expect("add");

    assert_eq!(table.update_rows(".k = 5", "true").expect("update"), 1);
    let row = table.row(0).unwrap();
    assert_eq!(row.get("k").unwrap().get::<i32>().unwrap(), 5);
    let image = row.get("image").unwrap().value::<Image>().expect("image kept");
    assert_eq!(image.dim(), ArrayDim::new(2, 2, 1, 1));
}
