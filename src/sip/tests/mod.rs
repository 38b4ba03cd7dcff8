mod message_test;
