use super::{Route, RouteTable};

#[test]
fn test_lookup_processor() {
    let table = RouteTable::new(vec![Route::new("CreateOrder", "orderProcessor")]);
    assert_eq!(table.lookup_processor("CreateOrder"), Some("orderProcessor"));
    assert_eq!(table.lookup_processor("CancelOrder"), None);
}

#[test]
fn test_first_route_wins_and_commands_are_distinct() {
    let table: RouteTable = vec![
        Route::new("Ping", "first"),
        Route::new("Pong", "pong"),
        Route::new("Ping", "second"),
    ]
    .into_iter()
    .collect();

    assert_eq!(table.lookup_processor("Ping"), Some("first"));
    assert_eq!(table.commands(), vec!["Ping", "Pong"]);
    assert!(!table.is_empty());
    assert!(RouteTable::default().is_empty());
}
