mod common;

use bson::{Bson, doc};
use proptest::prelude::*;
use wyvern_data::database::{derive_upsert, has_identity};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
}

proptest! {
    #![proptest_config(proptest::test_runner::Config {
        failure_persistence: Some(Box::new(proptest::test_runner::FileFailurePersistence::WithSource("proptest-regressions"))),
        cases: 32,
        .. proptest::test_runner::Config::default()
    })]

    #[test]
    fn prop_anonymous_upsert_filters_on_every_field(name in "[a-z]{0,12}", age in any::<i32>()) {
        let document = doc! {"name": name.clone(), "age": age};
        prop_assert!(!has_identity(&document));
        let op = derive_upsert(document.clone());
        prop_assert_eq!(op.filter.get("_id"), Some(&Bson::Null));
        for (key, value) in &document {
            prop_assert_eq!(op.filter.get(key), Some(value));
            prop_assert_eq!(op.replacement.get(key), Some(value));
        }
        prop_assert!(matches!(op.replacement.get("_id"), Some(Bson::ObjectId(_))));
    }

    #[test]
    fn prop_identified_upsert_filters_on_identity_only(id in "[a-z0-9]{1,16}", age in any::<i32>()) {
        let op = derive_upsert(doc! {"_id": id.clone(), "age": age});
        prop_assert_eq!(op.filter, doc! {"_id": id.clone()});
        prop_assert_eq!(op.replacement.get_str("_id").unwrap(), id.as_str());
    }

    #[test]
    fn prop_repeated_writes_insert_or_collapse(times in 1usize..6, identified in any::<bool>(), age in 0i32..120) {
        let stored = runtime().block_on(async {
            let (service, db) = common::facade("prop").await;
            let mut person = common::Person::new("Ann", age);
            if identified {
                person = person.with_id("ann");
            }
            for bump in 0..times {
                person.age = age + i32::try_from(bump).unwrap();
                db.write("people", &person).await.unwrap();
            }
            service.snapshot("prop", "people")
        });
        if identified {
            prop_assert_eq!(stored.len(), 1);
            let last = age + i32::try_from(times - 1).unwrap();
            prop_assert_eq!(stored[0].get_i32("age").unwrap(), last);
        } else {
            prop_assert_eq!(stored.len(), times);
        }
    }
}
