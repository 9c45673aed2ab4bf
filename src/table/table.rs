use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use rand::Rng;
use tracing::debug;

use crate::common::{EdfConfig, EdfError, OpenMode, Result, SortDirection, SysVal, UnmapMode};
use crate::storage::{EdfFile, RowStore};

use super::Attribute;

/// Rows shown by the `Display` rendering
const DISPLAY_ROWS: usize = 30;

/// A resolved column: the attribute and where it lives in the row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributeSpec {
    index: usize,
    attribute: Attribute,
}

impl AttributeSpec {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn attribute(&self) -> &Attribute {
        &self.attribute
    }
}

/// A growable table of typed columns stored in an EDF file.
///
/// The column set may change only while no rows exist. Every cell is
/// 8 bytes; attributes decide what those bytes mean.
pub struct Table {
    attributes: Vec<Attribute>,
    class_index: Option<usize>,
    store: RowStore,
}

impl Table {
    /// Creates a table backed by anonymous memory.
    pub fn new(attributes: Vec<Attribute>) -> Result<Self> {
        Self::with_edf(EdfFile::anonymous(EdfConfig::anonymous())?, attributes)
    }

    /// Creates a table in a new EDF file at `path`.
    pub fn create<P: AsRef<Path>>(
        path: P,
        attributes: Vec<Attribute>,
        config: EdfConfig,
    ) -> Result<Self> {
        Self::with_edf(EdfFile::open(path, OpenMode::Create, config)?, attributes)
    }

    /// Builds a table on an already mapped file.
    pub fn with_edf(edf: EdfFile, attributes: Vec<Attribute>) -> Result<Self> {
        for (i, attr) in attributes.iter().enumerate() {
            if attributes[..i].contains(attr) {
                return Err(EdfError::Schema(format!("duplicate attribute {}", attr)));
            }
        }
        let store = RowStore::new(edf, attributes.len())?;
        Ok(Self {
            attributes,
            class_index: None,
            store,
        })
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Position of `attr` in the row, if present.
    pub fn attribute_index(&self, attr: &Attribute) -> Option<usize> {
        self.attributes.iter().position(|a| a == attr)
    }

    /// Marks `attr` as the class (target) attribute.
    pub fn set_class_attribute(&mut self, attr: &Attribute) -> Result<()> {
        let index = self.resolve(attr)?.index;
        self.class_index = Some(index);
        Ok(())
    }

    pub fn class_attribute(&self) -> Option<&Attribute> {
        self.class_index.map(|i| &self.attributes[i])
    }

    /// Text form of the class value at `row`.
    pub fn class_value(&self, row: usize) -> Result<String> {
        let index = self
            .class_index
            .ok_or_else(|| EdfError::Schema("no class attribute is set".into()))?;
        self.attributes[index].decode(&self.store.get_cell(row, index)?)
    }

    /// Adds a column. Rejected once rows exist.
    pub fn add_attribute(&mut self, attr: Attribute) -> Result<()> {
        if self.attribute_index(&attr).is_some() {
            return Err(EdfError::Schema(format!("duplicate attribute {}", attr)));
        }
        self.store.reshape(self.attributes.len() + 1)?;
        self.attributes.push(attr);
        Ok(())
    }

    /// Removes a column. Rejected once rows exist.
    pub fn remove_attribute(&mut self, attr: &Attribute) -> Result<()> {
        let index = self.resolve(attr)?.index;
        self.store.reshape(self.attributes.len() - 1)?;
        self.attributes.remove(index);
        self.class_index = match self.class_index {
            Some(class) if class == index => None,
            Some(class) if class > index => Some(class - 1),
            other => other,
        };
        Ok(())
    }

    /// Looks up where `attr` is stored. The spec carries this table's own
    /// attribute, so values decode through this table's dictionaries.
    pub fn resolve(&self, attr: &Attribute) -> Result<AttributeSpec> {
        self.attribute_index(attr)
            .map(|index| AttributeSpec {
                index,
                attribute: self.attributes[index].clone(),
            })
            .ok_or_else(|| EdfError::Schema(format!("unknown attribute {}", attr)))
    }

    pub fn resolve_all(&self, attrs: &[Attribute]) -> Result<Vec<AttributeSpec>> {
        attrs.iter().map(|attr| self.resolve(attr)).collect()
    }

    /// Specs for every column, in row order.
    pub fn all_specs(&self) -> Vec<AttributeSpec> {
        self.attributes
            .iter()
            .enumerate()
            .map(|(index, attr)| AttributeSpec {
                index,
                attribute: attr.clone(),
            })
            .collect()
    }

    /// (columns, rows)
    pub fn size(&self) -> (usize, usize) {
        self.store.size()
    }

    pub fn rows(&self) -> usize {
        self.store.rows()
    }

    pub fn cols(&self) -> usize {
        self.store.cols()
    }

    /// Appends a row given one cell per column, in column order.
    pub fn append_row(&mut self, cells: &[SysVal]) -> Result<usize> {
        self.store.append_cells(cells)
    }

    /// Appends a row given cells keyed by attribute. Columns left out are
    /// zero.
    pub fn append_row_explicit(&mut self, row: &HashMap<Attribute, SysVal>) -> Result<usize> {
        let mut cells = vec![[0u8; 8]; self.attributes.len()];
        for (attr, cell) in row {
            let index = self.resolve(attr)?.index;
            cells[index] = *cell;
        }
        self.store.append_cells(&cells)
    }

    /// Appends a row given its text form, one value per column.
    pub fn append_row_strings(&mut self, values: &[&str]) -> Result<usize> {
        if values.len() != self.attributes.len() {
            return Err(EdfError::Schema(format!(
                "row has {} values, expected {}",
                values.len(),
                self.attributes.len()
            )));
        }
        let cells = self
            .attributes
            .iter()
            .zip(values)
            .map(|(attr, value)| attr.encode(value))
            .collect::<Result<Vec<_>>>()?;
        self.store.append_cells(&cells)
    }

    /// Adds `count` zeroed rows.
    pub fn extend(&mut self, count: usize) -> Result<()> {
        self.store.extend_rows(count)
    }

    pub fn get(&self, spec: &AttributeSpec, row: usize) -> Result<SysVal> {
        self.check_spec(spec)?;
        self.store.get_cell(row, spec.index)
    }

    pub fn set(&mut self, spec: &AttributeSpec, row: usize, cell: SysVal) -> Result<()> {
        self.check_spec(spec)?;
        self.store.set_cell(row, spec.index, &cell)
    }

    /// Text form of one cell.
    pub fn get_string(&self, spec: &AttributeSpec, row: usize) -> Result<String> {
        spec.attribute.decode(&self.get(spec, row)?)
    }

    /// Every cell of `row`, in column order.
    pub fn get_row(&self, row: usize) -> Result<Vec<SysVal>> {
        self.store.read_row(row)
    }

    /// The cells of `specs` at `row`, keyed by attribute.
    pub fn get_row_explicit(
        &self,
        specs: &[AttributeSpec],
        row: usize,
    ) -> Result<HashMap<Attribute, SysVal>> {
        specs
            .iter()
            .map(|spec| Ok((spec.attribute.clone(), self.get(spec, row)?)))
            .collect()
    }

    /// Calls `f` with each row index and the cells of `specs` until it
    /// returns `Ok(false)`.
    pub fn map_over_rows<F>(&self, specs: &[AttributeSpec], f: F) -> Result<()>
    where
        F: FnMut(usize, &[SysVal]) -> Result<bool>,
    {
        for spec in specs {
            self.check_spec(spec)?;
        }
        let cols: Vec<usize> = specs.iter().map(|s| s.index).collect();
        self.store.map_over_rows(&cols, f)
    }

    /// One row rendered as space-separated text.
    pub fn row_str(&self, row: usize) -> Result<String> {
        let cells = self.store.read_row(row)?;
        let values = self
            .attributes
            .iter()
            .zip(&cells)
            .map(|(attr, cell)| attr.decode(cell))
            .collect::<Result<Vec<_>>>()?;
        Ok(values.join(" "))
    }

    /// How often each rendered value of `attr` occurs.
    pub fn count_attr_values(&self, attr: &Attribute) -> Result<BTreeMap<String, usize>> {
        let spec = self.resolve(attr)?;
        let mut counts = BTreeMap::new();
        self.map_over_rows(std::slice::from_ref(&spec), |_, cells| {
            *counts.entry(spec.attribute.decode(&cells[0])?).or_insert(0) += 1;
            Ok(true)
        })?;
        Ok(counts)
    }

    /// Splits the rows by the rendered value of `attr`. The sub-tables hold
    /// every other column, in the same order.
    pub fn decompose_on_attribute_values(
        &self,
        attr: &Attribute,
    ) -> Result<BTreeMap<String, Table>> {
        let split = self.resolve(attr)?.index;
        let split_attr = &self.attributes[split];
        let kept: Vec<usize> = (0..self.attributes.len()).filter(|&i| i != split).collect();
        let kept_attrs: Vec<Attribute> = kept.iter().map(|&i| self.attributes[i].clone()).collect();

        let mut parts: BTreeMap<String, Table> = BTreeMap::new();
        for row in 0..self.rows() {
            let cells = self.store.read_row(row)?;
            let key = split_attr.decode(&cells[split])?;
            if !parts.contains_key(&key) {
                let part = self.derived(kept_attrs.clone())?;
                parts.insert(key.clone(), part);
            }
            let projected: Vec<SysVal> = kept.iter().map(|&i| cells[i]).collect();
            if let Some(part) = parts.get_mut(&key) {
                part.append_row(&projected)?;
            }
        }
        debug!(attribute = %attr, parts = parts.len(), "decomposed table");
        Ok(parts)
    }

    /// Class counts for each rendered value of `attr`.
    pub fn class_distribution_after_split(
        &self,
        attr: &Attribute,
    ) -> Result<BTreeMap<String, BTreeMap<String, usize>>> {
        let class = self
            .class_attribute()
            .cloned()
            .ok_or_else(|| EdfError::Schema("no class attribute is set".into()))?;
        let specs = [self.resolve(attr)?, self.resolve(&class)?];
        let split_attr = &specs[0].attribute;

        let mut distribution: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
        self.map_over_rows(&specs, |_, cells| {
            let split_value = split_attr.decode(&cells[0])?;
            let class_value = class.decode(&cells[1])?;
            *distribution
                .entry(split_value)
                .or_default()
                .entry(class_value)
                .or_insert(0) += 1;
            Ok(true)
        })?;
        Ok(distribution)
    }

    /// Sorts rows by `attrs`, the first being the most significant.
    ///
    /// Cells are compared as floats, so categorical and string columns sort
    /// by dictionary index. Row order outside the sort keys is not
    /// preserved.
    pub fn sort(&mut self, direction: SortDirection, attrs: &[Attribute]) -> Result<()> {
        let cols: Vec<usize> = self
            .resolve_all(attrs)?
            .into_iter()
            .map(|spec| spec.index)
            .collect();
        self.store.sort(direction, &cols)
    }

    /// Shuffles rows in place using the thread-local generator.
    pub fn shuffle(&mut self) -> Result<()> {
        self.shuffle_with(&mut rand::thread_rng())
    }

    pub fn shuffle_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        self.store.shuffle_with(rng)
    }

    /// A new table holding only `attrs`, in that order. Dictionaries are
    /// shared with this table.
    pub fn select_attributes(&self, attrs: &[Attribute]) -> Result<Table> {
        let specs = self.resolve_all(attrs)?;
        let cols: Vec<usize> = specs.iter().map(|spec| spec.index).collect();
        let mut selected = self.derived(specs.into_iter().map(|spec| spec.attribute).collect())?;
        let mut projected = Vec::with_capacity(cols.len());
        for row in 0..self.rows() {
            let cells = self.store.read_row(row)?;
            projected.clear();
            projected.extend(cols.iter().map(|&i| cells[i]));
            selected.append_row(&projected)?;
        }
        Ok(selected)
    }

    /// Shuffles, then sends each row to the test set with probability
    /// roughly `prop`. Returns (train, test).
    pub fn train_test_split<R: Rng + ?Sized>(
        &mut self,
        prop: f64,
        rng: &mut R,
    ) -> Result<(Table, Table)> {
        self.shuffle_with(rng)?;
        let threshold = (100.0 * prop) as i32;
        let mut train = self.derived(self.attributes.clone())?;
        let mut test = self.derived(self.attributes.clone())?;
        for row in 0..self.rows() {
            let cells = self.store.read_row(row)?;
            if rng.gen_range(0..=100) > threshold {
                train.append_row(&cells)?;
            } else {
                test.append_row(&cells)?;
            }
        }
        debug!(train = train.rows(), test = test.rows(), "split table");
        Ok((train, test))
    }

    /// True if both tables have the same shape and identical cells.
    pub fn content_eq(&self, other: &Table) -> Result<bool> {
        if self.size() != other.size() {
            return Ok(false);
        }
        for row in 0..self.rows() {
            if self.store.read_row(row)? != other.store.read_row(row)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The mapped file backing this table.
    pub fn edf(&self) -> &EdfFile {
        self.store.edf()
    }

    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    /// Releases the backing mapping.
    pub fn unmap(self, mode: UnmapMode) -> Result<()> {
        self.store.into_edf().unmap(mode)
    }

    /// An empty anonymous table with the same geometry and class attribute.
    fn derived(&self, attributes: Vec<Attribute>) -> Result<Table> {
        let parent = self.edf().config();
        let config = EdfConfig::anonymous()
            .with_page_size(parent.page_size())
            .with_segment_size(parent.segment_size())
            .with_segment_count(parent.segment_count());
        let mut table = Table::with_edf(EdfFile::anonymous(config)?, attributes)?;
        if let Some(class) = self.class_attribute() {
            if table.attribute_index(class).is_some() {
                table.set_class_attribute(class)?;
            }
        }
        Ok(table)
    }

    fn check_spec(&self, spec: &AttributeSpec) -> Result<()> {
        match self.attributes.get(spec.index) {
            Some(attr) if *attr == spec.attribute => Ok(()),
            Some(_) => Err(EdfError::Schema(format!(
                "{} is no longer at position {}",
                spec.attribute, spec.index
            ))),
            None => Err(EdfError::AttributeOutOfRange {
                index: spec.index,
                count: self.attributes.len(),
            }),
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (cols, rows) = self.size();
        writeln!(f, "Table with {} row(s) {} attribute(s)", rows, cols)?;
        writeln!(f, "Attributes:")?;
        for (i, attr) in self.attributes.iter().enumerate() {
            let prefix = if self.class_index == Some(i) { "*\t" } else { "\t" };
            writeln!(f, "{}{}", prefix, attr)?;
        }

        writeln!(f)?;
        writeln!(f, "Data:")?;
        let shown = rows.min(DISPLAY_ROWS);
        for row in 0..shown {
            let line = self.row_str(row).map_err(|_| fmt::Error)?;
            writeln!(f, "\t{}", line)?;
        }

        if rows > shown {
            write!(f, "\t...\n{} row(s) undisplayed", rows - shown)
        } else {
            write!(f, "All rows displayed")
        }
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("attributes", &self.attributes)
            .field("class_index", &self.class_index)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weather() -> (Table, Attribute, Attribute, Attribute) {
        let outlook = Attribute::categorical("outlook");
        let temp = Attribute::float("temperature");
        let play = Attribute::categorical("play");
        let mut table =
            Table::new(vec![outlook.clone(), temp.clone(), play.clone()]).unwrap();
        table.set_class_attribute(&play).unwrap();
        for row in [
            ["sunny", "85", "no"],
            ["sunny", "80", "no"],
            ["overcast", "83", "yes"],
            ["rainy", "70", "yes"],
            ["rainy", "65", "no"],
            ["overcast", "64", "yes"],
        ] {
            table.append_row_strings(&row).unwrap();
        }
        (table, outlook, temp, play)
    }

    #[test]
    fn test_row_str() {
        let (table, _, _, _) = weather();
        assert_eq!(table.row_str(0).unwrap(), "sunny 85 no");
        assert_eq!(table.size(), (3, 6));
    }

    #[test]
    fn test_schema_is_frozen_after_first_row() {
        let (mut table, outlook, _, _) = weather();
        assert!(matches!(
            table.add_attribute(Attribute::float("humidity")),
            Err(EdfError::Schema(_))
        ));
        assert!(matches!(
            table.remove_attribute(&outlook),
            Err(EdfError::Schema(_))
        ));
        assert_eq!(table.cols(), 3);
    }

    #[test]
    fn test_schema_changes_before_rows() {
        let a = Attribute::float("a");
        let b = Attribute::float("b");
        let class = Attribute::categorical("class");
        let mut table = Table::new(vec![a.clone(), class.clone()]).unwrap();
        table.set_class_attribute(&class).unwrap();
        table.add_attribute(b.clone()).unwrap();
        table.remove_attribute(&a).unwrap();
        assert_eq!(table.attributes(), &[class.clone(), b]);
        assert_eq!(table.class_attribute(), Some(&class));
        assert!(table.add_attribute(class).is_err());
    }

    #[test]
    fn test_stale_spec_is_rejected() {
        let a = Attribute::float("a");
        let b = Attribute::float("b");
        let mut table = Table::new(vec![a.clone(), b.clone()]).unwrap();
        let spec = table.resolve(&b).unwrap();
        table.remove_attribute(&a).unwrap();
        table.add_attribute(Attribute::float("c")).unwrap();
        table.append_row_strings(&["1", "2"]).unwrap();
        assert!(matches!(table.get(&spec, 0), Err(EdfError::Schema(_))));
    }

    #[test]
    fn test_append_explicit_leaves_missing_columns_zero() {
        let (mut table, outlook, _, _) = weather();
        let mut row = HashMap::new();
        row.insert(outlook.clone(), outlook.encode("rainy").unwrap());
        let index = table.append_row_explicit(&row).unwrap();
        assert_eq!(table.row_str(index).unwrap(), "rainy 0 no");

        let mut bad = HashMap::new();
        bad.insert(Attribute::float("wind"), [0u8; 8]);
        assert!(matches!(
            table.append_row_explicit(&bad),
            Err(EdfError::Schema(_))
        ));
        assert_eq!(table.rows(), 7);
    }

    #[test]
    fn test_count_and_class_distribution() {
        let (table, outlook, _, _) = weather();
        let counts = table.count_attr_values(&outlook).unwrap();
        assert_eq!(counts["sunny"], 2);
        assert_eq!(counts["overcast"], 2);
        assert_eq!(counts["rainy"], 2);

        let dist = table.class_distribution_after_split(&outlook).unwrap();
        assert_eq!(dist["sunny"]["no"], 2);
        assert_eq!(dist["overcast"]["yes"], 2);
        assert_eq!(dist["rainy"]["yes"], 1);
        assert_eq!(dist["rainy"]["no"], 1);
        assert!(!dist["sunny"].contains_key("yes"));
    }

    #[test]
    fn test_decompose_drops_split_column() {
        let (table, outlook, _, play) = weather();
        let parts = table.decompose_on_attribute_values(&outlook).unwrap();
        assert_eq!(parts.len(), 3);
        let rainy = &parts["rainy"];
        assert_eq!(rainy.size(), (2, 2));
        assert_eq!(rainy.row_str(0).unwrap(), "70 yes");
        assert_eq!(rainy.class_attribute(), Some(&play));
    }

    #[test]
    fn test_select_attributes_reorders() {
        let (table, outlook, temp, _) = weather();
        let selected = table.select_attributes(&[temp, outlook]).unwrap();
        assert_eq!(selected.row_str(2).unwrap(), "83 overcast");
        assert_eq!(selected.class_attribute(), None);
    }

    #[test]
    fn test_display() {
        let (table, _, _, _) = weather();
        let text = table.to_string();
        assert!(text.starts_with("Table with 6 row(s) 3 attribute(s)\n"));
        assert!(text.contains("*\tCategoricalAttribute(play)\n"));
        assert!(text.contains("\tFloatAttribute(temperature)\n"));
        assert!(text.contains("\tovercast 64 yes\n"));
        assert!(text.ends_with("All rows displayed"));
    }

    #[test]
    fn test_display_truncates() {
        let x = Attribute::float("x");
        let mut table = Table::new(vec![x]).unwrap();
        for i in 0..35 {
            let value = i.to_string();
            table.append_row_strings(&[value.as_str()]).unwrap();
        }
        let text = table.to_string();
        assert!(text.ends_with("\t...\n5 row(s) undisplayed"));
        assert!(text.contains("\t29\n"));
        assert!(!text.contains("\t30\n"));
    }

    #[test]
    fn test_duplicate_attributes_rejected() {
        let a = Attribute::float("a");
        assert!(matches!(
            Table::new(vec![a.clone(), a]),
            Err(EdfError::Schema(_))
        ));
    }
}
