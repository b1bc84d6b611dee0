//! Live to-many lists.

use crate::error::{CoreError, CoreResult};
use crate::object::{target_index, Object};
use crate::query::Predicate;
use crate::realm::RealmInner;
use crate::results::{Results, SortDescriptor};
use crate::schema::SchemaIndex;
use crate::value::Value;
use harealm_storage::{Cell, Group, RowKey};
use std::rc::Rc;

/// The ordered links stored in one array property of an object.
///
/// Reads always reflect the realm's current snapshot or write transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct List {
    parent: Object,
    property: usize,
}

impl List {
    pub(crate) fn new(parent: Object, property: usize) -> Self {
        Self { parent, property }
    }

    /// Returns the object owning the list.
    #[must_use]
    pub fn parent(&self) -> &Object {
        &self.parent
    }

    /// Returns the target type index and the linked rows.
    pub(crate) fn keys_in(
        &self,
        inner: &Rc<RealmInner>,
        group: &Group,
    ) -> CoreResult<(SchemaIndex, Vec<RowKey>)> {
        let owner = inner.schema.get(self.parent.schema_index());
        let target = target_index(inner, owner.properties()[self.property].object_type())?;
        let accessor = inner.accessor(group, self.parent.schema_index())?;
        let table = group.require_table(accessor.table_name())?;
        let keys = match table.get(self.parent.row_key(), accessor.column(self.property)) {
            Ok(cell) => cell.as_link_list().map(<[RowKey]>::to_vec).unwrap_or_default(),
            Err(_) => return Err(CoreError::InvalidatedObject),
        };
        Ok((target, keys))
    }

    fn read<R>(&self, f: impl FnOnce(&Rc<RealmInner>, SchemaIndex, &[RowKey]) -> CoreResult<R>) -> CoreResult<R> {
        self.parent.read(|inner, group, _, _| {
            let (target, keys) = self.keys_in(inner, group)?;
            f(inner, target, &keys)
        })
    }

    /// Returns the number of elements.
    pub fn len(&self) -> CoreResult<usize> {
        self.read(|_, _, keys| Ok(keys.len()))
    }

    /// Returns true if the list has no elements.
    pub fn is_empty(&self) -> CoreResult<bool> {
        self.len().map(|n| n == 0)
    }

    /// Returns the element at `index`.
    ///
    /// # Errors
    ///
    /// `IndexOutOfBounds` if `index >= len`.
    pub fn get(&self, index: usize) -> CoreResult<Object> {
        self.read(|inner, target, keys| {
            keys.get(index)
                .map(|key| Object::new(inner, target, *key))
                .ok_or(CoreError::IndexOutOfBounds {
                    index,
                    count: keys.len(),
                })
        })
    }

    /// Returns the first element.
    pub fn first(&self) -> CoreResult<Option<Object>> {
        self.read(|inner, target, keys| Ok(keys.first().map(|key| Object::new(inner, target, *key))))
    }

    /// Returns the last element.
    pub fn last(&self) -> CoreResult<Option<Object>> {
        self.read(|inner, target, keys| Ok(keys.last().map(|key| Object::new(inner, target, *key))))
    }

    /// Returns the elements as of now.
    pub fn to_vec(&self) -> CoreResult<Vec<Object>> {
        self.read(|inner, target, keys| Ok(keys.iter().map(|key| Object::new(inner, target, *key)).collect()))
    }

    /// Iterates over a snapshot of the elements.
    pub fn iter(&self) -> CoreResult<std::vec::IntoIter<Object>> {
        self.to_vec().map(Vec::into_iter)
    }

    /// Returns the position of `object`, or `None` if it is not an element.
    pub fn index_of(&self, object: &Object) -> CoreResult<Option<usize>> {
        self.read(|inner, target, keys| {
            if object.session() != inner.session || object.schema_index() != target {
                return Ok(None);
            }
            Ok(keys.iter().position(|key| *key == object.row_key()))
        })
    }

    /// Returns the position of the first element matching `predicate`.
    pub fn index_of_where(&self, predicate: Predicate) -> CoreResult<Option<usize>> {
        self.as_results()?.index_of_where(predicate)
    }

    /// Returns a live view of the list.
    pub fn as_results(&self) -> CoreResult<Results> {
        let inner = self.parent.live()?;
        let owner = inner.schema.get(self.parent.schema_index());
        let target = target_index(&inner, owner.properties()[self.property].object_type())?;
        Ok(Results::list(&inner, target, self.clone()))
    }

    /// Returns the elements matching `predicate`, in list order.
    pub fn filter(&self, predicate: Predicate) -> CoreResult<Results> {
        self.as_results()?.filter(predicate)
    }

    /// Returns the elements sorted by `descriptors`.
    pub fn sorted(&self, descriptors: impl IntoIterator<Item = SortDescriptor>) -> CoreResult<Results> {
        self.as_results()?.sorted(descriptors)
    }

    /// Returns the elements sorted by one property.
    pub fn sorted_by(&self, property: &str, ascending: bool) -> CoreResult<Results> {
        self.as_results()?.sorted_by(property, ascending)
    }

    /// Minimum of a numeric or date property.
    pub fn min(&self, property: &str) -> CoreResult<Option<Value>> {
        self.as_results()?.min(property)
    }

    /// Maximum of a numeric or date property.
    pub fn max(&self, property: &str) -> CoreResult<Option<Value>> {
        self.as_results()?.max(property)
    }

    /// Sum of a numeric property.
    pub fn sum(&self, property: &str) -> CoreResult<Value> {
        self.as_results()?.sum(property)
    }

    /// Average of a numeric property.
    pub fn average(&self, property: &str) -> CoreResult<Option<f64>> {
        self.as_results()?.average(property)
    }

    /// Applies `f` to the stored keys inside the write transaction.
    fn modify<R>(
        &self,
        elements: &[&Object],
        f: impl FnOnce(&mut Vec<RowKey>, &[RowKey]) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let inner = self.parent.live()?;
        inner.mutate(|group| {
            let (target, mut keys) = self.keys_in(&inner, group)?;
            let new_keys = elements
                .iter()
                .map(|object| element_key(&inner, group, target, object))
                .collect::<CoreResult<Vec<_>>>()?;
            let result = f(&mut keys, &new_keys)?;

            let accessor = inner.accessor(group, self.parent.schema_index())?;
            group.require_table_mut(accessor.table_name())?.set(
                self.parent.row_key(),
                accessor.column(self.property),
                Cell::LinkList(keys),
            )?;
            Ok(result)
        })
    }

    /// Inserts `object` at `index`.
    ///
    /// # Errors
    ///
    /// `IndexOutOfBounds` if `index > len`; reference errors for objects
    /// that are deleted, of another realm or of the wrong type.
    pub fn insert(&self, index: usize, object: &Object) -> CoreResult<()> {
        self.modify(&[object], |keys, new| {
            if index > keys.len() {
                return Err(CoreError::IndexOutOfBounds {
                    index,
                    count: keys.len(),
                });
            }
            keys.insert(index, new[0]);
            Ok(())
        })
    }

    /// Replaces the element at `index`.
    pub fn replace(&self, index: usize, object: &Object) -> CoreResult<()> {
        self.modify(&[object], |keys, new| {
            let count = keys.len();
            let slot = keys
                .get_mut(index)
                .ok_or(CoreError::IndexOutOfBounds { index, count })?;
            *slot = new[0];
            Ok(())
        })
    }

    /// Removes the element at `index`. The object itself is not deleted.
    pub fn remove(&self, index: usize) -> CoreResult<()> {
        self.modify(&[], |keys, _| {
            if index >= keys.len() {
                return Err(CoreError::IndexOutOfBounds {
                    index,
                    count: keys.len(),
                });
            }
            keys.remove(index);
            Ok(())
        })
    }

    /// Appends `object`.
    pub fn add(&self, object: &Object) -> CoreResult<()> {
        self.add_all([object])
    }

    /// Appends every object, failing without changes if any is invalid.
    pub fn add_all<'o>(&self, objects: impl IntoIterator<Item = &'o Object>) -> CoreResult<()> {
        let objects: Vec<&Object> = objects.into_iter().collect();
        self.modify(&objects, |keys, new| {
            keys.extend_from_slice(new);
            Ok(())
        })
    }

    /// Removes the last element, if any.
    pub fn remove_last(&self) -> CoreResult<()> {
        self.modify(&[], |keys, _| {
            keys.pop();
            Ok(())
        })
    }

    /// Removes every element.
    pub fn remove_all(&self) -> CoreResult<()> {
        self.modify(&[], |keys, _| {
            keys.clear();
            Ok(())
        })
    }
}

/// Resolves an element to a row of the list's realm.
fn element_key(inner: &RealmInner, group: &Group, target: SchemaIndex, object: &Object) -> CoreResult<RowKey> {
    if object.session() != inner.session {
        object.live()?;
        return Err(CoreError::CrossRealmReference {
            type_name: object.type_name().to_string(),
        });
    }
    let target_schema = inner.schema.get(target);
    if object.schema_index() != target {
        return Err(CoreError::invalid_value(
            target_schema.name(),
            object.type_name(),
            format!("expected an object of type {}", target_schema.name()),
        ));
    }
    let table = group.require_table(&crate::metadata::table_name(target_schema.name()))?;
    if !table.contains(object.row_key()) {
        return Err(CoreError::InvalidatedObject);
    }
    Ok(object.row_key())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealmConfig;
    use crate::realm::Realm;
    use crate::schema::{ObjectSchema, Property, Schema};
    use serde_json::json;

    fn realm(id: &str) -> Realm {
        let schema = Schema::register([
            ObjectSchema::builder("Owner")
                .property(Property::string("name"))
                .property(Property::array("dogs", "Dog"))
                .build(),
            ObjectSchema::builder("Dog")
                .property(Property::string("name"))
                .property(Property::int("age").default_value(1))
                .build(),
        ])
        .unwrap();
        Realm::open(RealmConfig::in_memory(id).schema(schema)).unwrap()
    }

    fn names(list: &List) -> Vec<String> {
        list.iter()
            .unwrap()
            .map(|dog| dog.get("name").unwrap().as_str().unwrap().to_string())
            .collect()
    }

    fn owner_with_dogs(realm: &Realm) -> (Object, Vec<Object>) {
        realm
            .write(|r| {
                let owner = r.create("Owner", json!({"name": "Ann"}))?;
                let dogs = ["Rex", "Fido", "Spot"]
                    .into_iter()
                    .enumerate()
                    .map(|(i, name)| {
                        r.create("Dog", [("name", name.into()), ("age", (i as i64 + 2).into())])
                    })
                    .collect::<CoreResult<Vec<_>>>()?;
                Ok((owner, dogs))
            })
            .unwrap()
    }

    #[test]
    fn insert_replace_remove() {
        let realm = realm("list-edit");
        let (owner, dogs) = owner_with_dogs(&realm);
        let list = owner.list("dogs").unwrap();

        realm.begin_write().unwrap();
        list.add(&dogs[0]).unwrap();
        list.insert(0, &dogs[1]).unwrap();
        list.insert(2, &dogs[2]).unwrap();
        assert_eq!(names(&list), ["Fido", "Rex", "Spot"]);

        list.replace(1, &dogs[2]).unwrap();
        assert_eq!(names(&list), ["Fido", "Spot", "Spot"]);

        list.remove(0).unwrap();
        list.remove_last().unwrap();
        assert_eq!(names(&list), ["Spot"]);
        realm.commit_write().unwrap();
    }

    #[test]
    fn out_of_bounds_indexes() {
        let realm = realm("list-bounds");
        let (owner, dogs) = owner_with_dogs(&realm);
        let list = owner.list("dogs").unwrap();

        realm.begin_write().unwrap();
        assert!(matches!(
            list.insert(1, &dogs[0]),
            Err(CoreError::IndexOutOfBounds { index: 1, count: 0 })
        ));
        list.insert(0, &dogs[0]).unwrap();
        assert!(matches!(
            list.replace(1, &dogs[1]),
            Err(CoreError::IndexOutOfBounds { .. })
        ));
        assert!(matches!(list.remove(1), Err(CoreError::IndexOutOfBounds { .. })));
        realm.commit_write().unwrap();
        assert!(matches!(list.get(5), Err(CoreError::IndexOutOfBounds { .. })));
    }

    #[test]
    fn mutations_need_a_write() {
        let realm = realm("list-no-write");
        let (owner, dogs) = owner_with_dogs(&realm);
        let list = owner.list("dogs").unwrap();
        assert!(matches!(
            list.add(&dogs[0]),
            Err(CoreError::NotInWriteTransaction)
        ));
    }

    #[test]
    fn elements_must_match_target_and_realm() {
        let other = realm("list-target-other");
        let realm = realm("list-target");
        let (owner, dogs) = owner_with_dogs(&realm);
        let (_, foreign) = owner_with_dogs(&other);
        let list = owner.list("dogs").unwrap();

        realm.begin_write().unwrap();
        assert!(matches!(
            list.add(&owner),
            Err(CoreError::InvalidValue { .. })
        ));
        assert!(matches!(
            list.add(&foreign[0]),
            Err(CoreError::CrossRealmReference { .. })
        ));
        // A failing element leaves earlier ones out as well.
        assert!(list.add_all([&dogs[0], &owner]).is_err());
        assert_eq!(list.len().unwrap(), 0);
        realm.cancel_write().unwrap();
    }

    #[test]
    fn deleted_elements_drop_out() {
        let realm = realm("list-delete");
        let (owner, dogs) = owner_with_dogs(&realm);
        let list = owner.list("dogs").unwrap();
        realm
            .write(|_| list.add_all(dogs.iter()))
            .unwrap();
        realm.write(|r| r.delete(&dogs[1])).unwrap();
        assert_eq!(names(&list), ["Rex", "Spot"]);
        assert_eq!(list.index_of(&dogs[2]).unwrap(), Some(1));
        assert_eq!(list.index_of(&dogs[1]).unwrap(), None);
    }

    #[test]
    fn list_queries_and_aggregates() {
        let realm = realm("list-query");
        let (owner, dogs) = owner_with_dogs(&realm);
        let list = owner.list("dogs").unwrap();
        realm
            .write(|_| list.add_all([&dogs[2], &dogs[0], &dogs[1]]))
            .unwrap();

        let young = list.filter(Predicate::lt("age", 4i64)).unwrap();
        assert_eq!(young.len().unwrap(), 2);
        assert_eq!(young.get(0).unwrap(), dogs[0]);

        let by_age = list.sorted_by("age", false).unwrap();
        assert_eq!(by_age.first().unwrap().unwrap(), dogs[2]);
        assert_eq!(list.index_of_where(Predicate::eq("name", "Fido")).unwrap(), Some(2));

        assert_eq!(list.sum("age").unwrap(), Value::Int(9));
        assert_eq!(list.max("age").unwrap(), Some(Value::Int(4)));
        assert_eq!(list.average("age").unwrap(), Some(3.0));
    }

    #[test]
    fn remove_all_keeps_objects() {
        let realm = realm("list-clear");
        let (owner, dogs) = owner_with_dogs(&realm);
        let list = owner.list("dogs").unwrap();
        realm
            .write(|_| {
                list.add_all(dogs.iter())?;
                list.remove_all()
            })
            .unwrap();
        assert!(list.is_empty().unwrap());
        assert_eq!(realm.objects("Dog").unwrap().len().unwrap(), 3);
        assert!(list.first().unwrap().is_none());
    }
}
