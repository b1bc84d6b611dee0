//! Live query results.
//!
//! A [`Results`] is a lazily evaluated view over the rows of one type (or
//! the elements of a [`List`]). Filters conjoin left to right and the last
//! sort applied wins. The evaluated rows are cached until the realm's
//! change stamp moves.

use crate::error::{CoreError, CoreResult};
use crate::list::List;
use crate::object::Object;
use crate::query::Predicate;
use crate::realm::RealmInner;
use crate::schema::{ObjectSchema, PropertyType, SchemaIndex};
use crate::value::Value;
use harealm_storage::{Cell, RowKey, Table};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::{Rc, Weak};

/// A sort key: property name and direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortDescriptor {
    property: String,
    ascending: bool,
}

impl SortDescriptor {
    /// Creates a sort descriptor.
    pub fn new(property: impl Into<String>, ascending: bool) -> Self {
        Self {
            property: property.into(),
            ascending,
        }
    }

    /// Ascending order on `property`.
    pub fn asc(property: impl Into<String>) -> Self {
        Self::new(property, true)
    }

    /// Descending order on `property`.
    pub fn desc(property: impl Into<String>) -> Self {
        Self::new(property, false)
    }

    /// Returns the property name.
    #[must_use]
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Returns true for ascending order.
    #[must_use]
    pub fn is_ascending(&self) -> bool {
        self.ascending
    }

    /// Returns the descriptor with the opposite direction.
    #[must_use]
    pub fn reversed(&self) -> Self {
        Self::new(self.property.clone(), !self.ascending)
    }
}

#[derive(Debug, Clone)]
enum Base {
    Table,
    List(List),
}

type Cached = Option<(u64, Rc<Vec<RowKey>>)>;

/// A live, lazily evaluated collection of objects of one type.
#[derive(Debug, Clone)]
pub struct Results {
    realm: Weak<RealmInner>,
    index: SchemaIndex,
    base: Base,
    filters: Vec<Predicate>,
    sort: Vec<SortDescriptor>,
    cache: RefCell<Cached>,
}

impl Results {
    pub(crate) fn table(realm: &Rc<RealmInner>, index: SchemaIndex) -> Self {
        Self::with_base(realm, index, Base::Table)
    }

    pub(crate) fn list(realm: &Rc<RealmInner>, index: SchemaIndex, list: List) -> Self {
        Self::with_base(realm, index, Base::List(list))
    }

    fn with_base(realm: &Rc<RealmInner>, index: SchemaIndex, base: Base) -> Self {
        Self {
            realm: Rc::downgrade(realm),
            index,
            base,
            filters: Vec::new(),
            sort: Vec::new(),
            cache: RefCell::new(None),
        }
    }

    fn live(&self) -> CoreResult<Rc<RealmInner>> {
        let inner = self.realm.upgrade().ok_or(CoreError::RealmClosed)?;
        if inner.is_closed() {
            return Err(CoreError::RealmClosed);
        }
        Ok(inner)
    }

    fn derive(&self) -> Self {
        Self {
            cache: RefCell::new(None),
            ..self.clone()
        }
    }

    /// Returns the type name of the elements.
    pub fn type_name(&self) -> CoreResult<String> {
        Ok(self.live()?.schema.get(self.index).name().to_string())
    }

    /// Narrows the results to rows matching `predicate`.
    ///
    /// # Errors
    ///
    /// `InvalidProperty` / `InvalidValue` if the predicate does not fit the
    /// type.
    pub fn filter(&self, predicate: Predicate) -> CoreResult<Results> {
        let inner = self.live()?;
        predicate.validate(inner.schema.get(self.index))?;
        let mut results = self.derive();
        results.filters.push(predicate);
        Ok(results)
    }

    /// Sorts by `descriptors`, replacing any earlier sort.
    ///
    /// # Errors
    ///
    /// `InvalidProperty` for unknown or unsortable properties.
    pub fn sorted(&self, descriptors: impl IntoIterator<Item = SortDescriptor>) -> CoreResult<Results> {
        let inner = self.live()?;
        let object_schema = inner.schema.get(self.index);
        let descriptors: Vec<_> = descriptors.into_iter().collect();
        for descriptor in &descriptors {
            sort_position(object_schema, descriptor.property())?;
        }
        let mut results = self.derive();
        results.sort = descriptors;
        Ok(results)
    }

    /// Sorts by one property.
    pub fn sorted_by(&self, property: &str, ascending: bool) -> CoreResult<Results> {
        self.sorted([SortDescriptor::new(property, ascending)])
    }

    /// Evaluates the rows, reusing the cache while the realm is unchanged.
    fn keys(&self) -> CoreResult<(Rc<RealmInner>, Rc<Vec<RowKey>>)> {
        let inner = self.live()?;
        let stamp = inner.change_stamp();
        if let Some((cached, keys)) = &*self.cache.borrow() {
            if *cached == stamp {
                return Ok((inner, Rc::clone(keys)));
            }
        }

        let keys = inner.read(|group| {
            let object_schema = inner.schema.get(self.index);
            let accessor = inner.accessor(group, self.index)?;
            let table = group.require_table(accessor.table_name())?;
            let mut keys: Vec<RowKey> = match &self.base {
                Base::Table => table.row_keys().collect(),
                Base::List(list) => list.keys_in(&inner, group)?.1,
            };
            if !self.filters.is_empty() {
                let evaluator = Predicate::And(self.filters.clone()).compile_in(
                    object_schema,
                    &accessor,
                    &inner.schema,
                    inner.session,
                )?;
                keys.retain(|row| evaluator.matches(table, *row));
            }
            if !self.sort.is_empty() {
                let columns = self
                    .sort
                    .iter()
                    .map(|d| {
                        sort_position(object_schema, d.property())
                            .map(|p| (accessor.column(p), d.is_ascending()))
                    })
                    .collect::<CoreResult<Vec<_>>>()?;
                keys.sort_by(|a, b| compare_rows(table, &columns, *a, *b));
            }
            Ok(keys)
        })?;

        let keys = Rc::new(keys);
        *self.cache.borrow_mut() = Some((stamp, Rc::clone(&keys)));
        Ok((inner, keys))
    }

    /// Returns the number of objects.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.keys()?.1.len())
    }

    /// Returns true if there are no objects.
    pub fn is_empty(&self) -> CoreResult<bool> {
        self.len().map(|n| n == 0)
    }

    /// Returns the object at `index`.
    ///
    /// # Errors
    ///
    /// `IndexOutOfBounds` if `index >= len`.
    pub fn get(&self, index: usize) -> CoreResult<Object> {
        let (inner, keys) = self.keys()?;
        keys.get(index)
            .map(|key| Object::new(&inner, self.index, *key))
            .ok_or(CoreError::IndexOutOfBounds {
                index,
                count: keys.len(),
            })
    }

    /// Returns the first object.
    pub fn first(&self) -> CoreResult<Option<Object>> {
        let (inner, keys) = self.keys()?;
        Ok(keys.first().map(|key| Object::new(&inner, self.index, *key)))
    }

    /// Returns the last object.
    pub fn last(&self) -> CoreResult<Option<Object>> {
        let (inner, keys) = self.keys()?;
        Ok(keys.last().map(|key| Object::new(&inner, self.index, *key)))
    }

    /// Returns the objects as of now.
    pub fn to_vec(&self) -> CoreResult<Vec<Object>> {
        let (inner, keys) = self.keys()?;
        Ok(keys.iter().map(|key| Object::new(&inner, self.index, *key)).collect())
    }

    /// Iterates over a snapshot of the objects.
    pub fn iter(&self) -> CoreResult<std::vec::IntoIter<Object>> {
        self.to_vec().map(Vec::into_iter)
    }

    /// Returns the position of `object`, or `None` if it is not included.
    pub fn index_of(&self, object: &Object) -> CoreResult<Option<usize>> {
        let (inner, keys) = self.keys()?;
        if object.session() != inner.session || object.schema_index() != self.index {
            return Ok(None);
        }
        Ok(keys.iter().position(|key| *key == object.row_key()))
    }

    /// Returns the position of the first object matching `predicate`.
    pub fn index_of_where(&self, predicate: Predicate) -> CoreResult<Option<usize>> {
        let (inner, keys) = self.keys()?;
        inner.read(|group| {
            let accessor = inner.accessor(group, self.index)?;
            let table = group.require_table(accessor.table_name())?;
            let evaluator = predicate.compile_in(
                inner.schema.get(self.index),
                &accessor,
                &inner.schema,
                inner.session,
            )?;
            Ok(keys.iter().position(|key| evaluator.matches(table, *key)))
        })
    }

    /// Collects the non-null cells of a property for an aggregate.
    fn aggregate_cells(&self, operation: &'static str, property: &str) -> CoreResult<(PropertyType, Vec<Cell>)> {
        let (inner, keys) = self.keys()?;
        let object_schema = inner.schema.get(self.index);
        let position = object_schema.property_index(property).ok_or_else(|| {
            CoreError::invalid_property(object_schema.name(), property, "no such property")
        })?;
        let kind = object_schema.properties()[position].kind();
        let supported = match operation {
            "min" | "max" => matches!(
                kind,
                PropertyType::Int | PropertyType::Float | PropertyType::Double | PropertyType::Date
            ),
            _ => matches!(kind, PropertyType::Int | PropertyType::Float | PropertyType::Double),
        };
        if !supported {
            return Err(CoreError::UnsupportedAggregateProperty {
                operation,
                type_name: object_schema.name().to_string(),
                property: property.to_string(),
            });
        }
        let cells = inner.read(|group| {
            let accessor = inner.accessor(group, self.index)?;
            let table = group.require_table(accessor.table_name())?;
            let column = accessor.column(position);
            Ok(keys
                .iter()
                .filter_map(|key| table.get(*key, column).ok())
                .filter(|cell| !cell.is_null())
                .cloned()
                .collect())
        })?;
        Ok((kind, cells))
    }

    fn extreme(&self, operation: &'static str, property: &str, wanted: Ordering) -> CoreResult<Option<Value>> {
        let (_, cells) = self.aggregate_cells(operation, property)?;
        let best = cells.iter().fold(None::<&Cell>, |best, cell| match best {
            Some(b) if cell.compare(b) != Some(wanted) => Some(b),
            _ => Some(cell),
        });
        Ok(best.map(Value::from_cell))
    }

    /// Minimum of an int, float, double or date property; `None` if empty.
    pub fn min(&self, property: &str) -> CoreResult<Option<Value>> {
        self.extreme("min", property, Ordering::Less)
    }

    /// Maximum of an int, float, double or date property; `None` if empty.
    pub fn max(&self, property: &str) -> CoreResult<Option<Value>> {
        self.extreme("max", property, Ordering::Greater)
    }

    /// Sum of an int, float or double property; zero if empty.
    ///
    /// Integer properties sum to `Value::Int`, floating ones to
    /// `Value::Double`. An integer sum that overflows `i64` is returned as
    /// `Value::Double`.
    pub fn sum(&self, property: &str) -> CoreResult<Value> {
        let (kind, cells) = self.aggregate_cells("sum", property)?;
        Ok(match kind {
            PropertyType::Int => cells
                .iter()
                .filter_map(Cell::as_int)
                .try_fold(0i64, i64::checked_add)
                .map_or_else(
                    || Value::Double(cells.iter().filter_map(Cell::as_f64).sum()),
                    Value::Int,
                ),
            _ => Value::Double(cells.iter().filter_map(Cell::as_f64).sum()),
        })
    }

    /// Average of an int, float or double property; `None` if empty.
    pub fn average(&self, property: &str) -> CoreResult<Option<f64>> {
        let (_, cells) = self.aggregate_cells("average", property)?;
        if cells.is_empty() {
            return Ok(None);
        }
        let total: f64 = cells.iter().filter_map(Cell::as_f64).sum();
        #[allow(clippy::cast_precision_loss)]
        Ok(Some(total / cells.len() as f64))
    }
}

fn sort_position(object_schema: &ObjectSchema, property: &str) -> CoreResult<usize> {
    let position = object_schema.property_index(property).ok_or_else(|| {
        CoreError::invalid_property(object_schema.name(), property, "no such property")
    })?;
    if matches!(
        object_schema.properties()[position].kind(),
        PropertyType::Object | PropertyType::Array | PropertyType::Data
    ) {
        return Err(CoreError::invalid_property(
            object_schema.name(),
            property,
            "cannot sort on this property kind",
        ));
    }
    Ok(position)
}

/// Orders two rows by the sort columns. Nulls sort first, NaN after numbers.
fn compare_rows(table: &Table, columns: &[(usize, bool)], a: RowKey, b: RowKey) -> Ordering {
    for &(column, ascending) in columns {
        let ordering = match (table.get(a, column), table.get(b, column)) {
            (Ok(x), Ok(y)) => match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => x.sort_cmp(y),
            },
            _ => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return if ascending { ordering } else { ordering.reverse() };
        }
    }
    Ordering::Equal
}
