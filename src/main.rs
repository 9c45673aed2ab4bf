use edfgrid::common::{EdfConfig, SortDirection, UnmapMode};
use edfgrid::table::{Attribute, Table};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    println!("Edfgrid - memory-mapped tabular storage in Rust");
    println!("===============================================\n");

    // Create a temporary EDF file for demonstration
    let path = "demo.edf";

    let sepal_length = Attribute::float("sepal length");
    let sepal_width = Attribute::float("sepal width");
    let species = Attribute::categorical("species");

    let mut table = Table::create(
        path,
        vec![sepal_length.clone(), sepal_width, species.clone()],
        EdfConfig::host(),
    )
    .expect("Failed to create table");
    table
        .set_class_attribute(&species)
        .expect("Failed to set class attribute");
    println!("Created table in: {}", path);

    let rows = [
        ["6.3", "3.3", "Iris-virginica"],
        ["5.1", "3.5", "Iris-setosa"],
        ["7.0", "3.2", "Iris-versicolor"],
        ["4.9", "3.0", "Iris-setosa"],
        ["5.8", "2.7", "Iris-virginica"],
        ["6.4", "3.2", "Iris-versicolor"],
    ];
    for row in &rows {
        let index = table.append_row_strings(row).expect("Failed to append row");
        println!("Appended row {}: {}", index, row.join(" "));
    }

    println!("\nThreads:");
    for (id, name) in table.edf().list_threads().expect("Failed to list threads") {
        println!("  - {}: {}", id, name);
    }

    println!("\nTable of contents:");
    for entry in table.edf().contents().expect("Failed to read TOC") {
        println!(
            "  - thread {}: pages {}..{}",
            entry.thread, entry.start, entry.end
        );
    }

    // Sort by sepal length, largest first
    table
        .sort(SortDirection::Descending, &[sepal_length])
        .expect("Failed to sort");
    println!("\nSorted by sepal length (descending):\n{}\n", table);

    let counts = table
        .count_attr_values(&species)
        .expect("Failed to count values");
    println!("Species counts:");
    for (value, count) in &counts {
        println!("  - {}: {}", value, count);
    }

    // Flush and release the mapping
    table.unmap(UnmapMode::Sync).expect("Failed to unmap");

    // Clean up
    std::fs::remove_file(path).ok();
    println!("\nDemo completed successfully!");
}
