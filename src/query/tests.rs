#[cfg(test)]
mod tests {
    use crate::pool::types::Priority;
    use crate::query::types::{Method, QueryDefinition, QueryId, QueryRequest, TaskId};

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(QueryId::new(), QueryId::new());
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn test_named_factories_set_method() {
        let id = QueryId("q-1".to_string());

        assert_eq!(QueryRequest::create(id.clone()).method(), Method::Create);
        assert_eq!(QueryRequest::plan(id.clone()).method(), Method::Plan);
        assert_eq!(QueryRequest::predict(id.clone()).method(), Method::Predict);
        assert_eq!(QueryRequest::next(id.clone()).method(), Method::Next);
        assert_eq!(QueryRequest::cancel(id.clone()).method(), Method::Cancel);
        assert_eq!(QueryRequest::close(id.clone()).method(), Method::Close);
        assert_eq!(QueryRequest::next(id.clone()).query_id(), &id);
    }

    #[test]
    fn test_method_parse_is_case_insensitive() {
        assert_eq!(Method::parse("next"), Some(Method::Next));
        assert_eq!(Method::parse("CLOSE"), Some(Method::Close));
        assert_eq!(Method::parse("reset"), None);
        assert!(Method::Plan.is_read_only());
        assert!(!Method::Next.is_read_only());
    }

    #[test]
    fn test_request_wire_format() {
        let request = QueryRequest::cancel(QueryId("abc".to_string()));
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["method"], "CANCEL");
        assert_eq!(json["query_id"], "abc");
    }

    #[test]
    fn test_definition_defaults() {
        let def: QueryDefinition =
            serde_json::from_str(r#"{"logic_name": "EventQuery", "query": "FIELD == 'x'"}"#)
                .unwrap();

        assert!(def.query_id.is_none());
        assert!(def.pool_name.is_none());
        assert_eq!(def.priority, Priority::Normal);
        assert_eq!(def.page_size, 100);
    }
}
