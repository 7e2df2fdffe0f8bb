mod routes_tests;
