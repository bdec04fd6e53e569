#[cfg(test)]
mod examples {
    use std::sync::Arc;
    use std::thread;

    use rtcore::{Dictionary, Error, Value};

    #[test]
    fn single_threaded() {
        let workload_size: i64 = 128;
        let dict = Dictionary::new();
        for i in 1..workload_size {
            if i % 2 == 0 {
                assert!(dict.set_item(Value::from(-i), Value::from(i)).is_ok());
            } else {
                assert!(dict.set_item(Value::from(i), Value::from(i)).is_ok());
            }
        }
        for i in 1..workload_size {
            let (present, absent) = if i % 2 == 0 { (-i, i) } else { (i, -i) };
            assert!(dict.contains_key(&Value::from(present)).unwrap());
            assert!(!dict.contains_key(&Value::from(absent)).unwrap());
            assert!(matches!(dict.get_item(&Value::from(absent)), Err(Error::KeyError(_))));
        }
        for i in 1..workload_size {
            let key = if i % 2 == 0 { -i } else { i };
            assert_eq!(dict.pop(&Value::from(key)).unwrap(), Value::from(i));
            assert!(dict.pop(&Value::from(key)).is_err());
        }
        assert!(dict.is_empty());
    }

    #[test]
    fn mixed_keys() {
        let dict = Dictionary::new();
        assert!(dict.set_item(Value::from("name"), Value::from("rtcore")).is_ok());
        assert!(dict.set_item(Value::from(1), Value::from("one")).is_ok());
        assert!(dict.set_item(Value::from(1.0), Value::from("uno")).is_ok());
        let pair = Value::tuple([Value::from(1), Value::from("a")]);
        assert!(dict.set_item(pair, Value::None).is_ok());
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.get_item(&Value::from(1)).unwrap(), Value::from("uno"));
        assert!(dict.set_item(Value::from(vec![]), Value::None).is_ok());
        assert_eq!(dict.len(), 4);
    }

    #[test]
    fn multi_threaded() {
        let dict = Arc::new(Dictionary::new());
        let num_threads: i64 = 4;
        let workload_size: i64 = 256;
        let threads: Vec<_> = (0..num_threads)
            .map(|thread_id| {
                let dict = dict.clone();
                thread::spawn(move || {
                    let base = thread_id * workload_size;
                    for k in base..base + workload_size {
                        assert!(dict.set_item(Value::from(k), Value::from(k)).is_ok());
                    }
                    for k in base..base + workload_size {
                        assert_eq!(dict.get(&Value::from(k)).unwrap(), Some(Value::from(k)));
                    }
                })
            })
            .collect();
        for thread in threads {
            assert!(thread.join().is_ok());
        }
        assert_eq!(dict.keys().len(), dict.len());
        assert_eq!(dict.values().len(), 1024);
    }
}
